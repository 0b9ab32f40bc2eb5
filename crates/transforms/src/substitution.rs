use crate::{config::PassSettings, PassContext, Transform};
use rand::Rng;
use tracing::debug;
use veil_core::{BinaryOp, Function, InstId, InstKind, Type, Value};
use veil_utils::errors::TransformError;

/// Replaces arithmetic with equivalent but longer sequences.
///
/// * `a + b` becomes `a - (0 - b)`
/// * `a - b` becomes `a + (0 - b)`
/// * `a * 3` (either operand the constant 3, width ≥ 8) becomes `(a << 1) + a`
///
/// All rewrites are exact under wrapping two's-complement arithmetic. Control flow is
/// untouched.
pub struct Substitution {
    probability: f64,
}

impl Substitution {
    pub const DEFAULT_PROBABILITY: f64 = 1.0;

    pub fn new(settings: &PassSettings) -> Self {
        Self {
            probability: settings.probability.unwrap_or(Self::DEFAULT_PROBABILITY),
        }
    }
}

impl Default for Substitution {
    fn default() -> Self {
        Self::new(&PassSettings::default())
    }
}

/// A planned rewrite of one binary instruction.
#[derive(Debug, Clone, Copy)]
enum Rewrite {
    Add { lhs: Value, rhs: Value, ty: Type },
    Sub { lhs: Value, rhs: Value, ty: Type },
    MulByThree { operand: Value, ty: Type },
}

/// `None` for instructions the pass does not look at, `Some(None)` for candidates it has to
/// skip.
fn plan(func: &Function, id: InstId) -> Option<Option<Rewrite>> {
    let data = func.inst(id).ok()?;
    let InstKind::Binary { op, lhs, rhs } = data.kind else {
        return None;
    };
    let ty = data.ty;
    if !matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
        return None;
    }
    if !ty.is_integer() {
        return Some(None);
    }
    Some(match op {
        BinaryOp::Add => Some(Rewrite::Add { lhs, rhs, ty }),
        BinaryOp::Sub => Some(Rewrite::Sub { lhs, rhs, ty }),
        _ => {
            let is_three = |v: Value| v.as_const() == Some((ty, 3));
            match (ty.bit_width(), is_three(lhs), is_three(rhs)) {
                (Some(w), _, true) if w >= 8 => Some(Rewrite::MulByThree { operand: lhs, ty }),
                (Some(w), true, _) if w >= 8 => Some(Rewrite::MulByThree { operand: rhs, ty }),
                _ => None,
            }
        }
    })
}

/// Emits the replacement sequence in front of `id` and returns its final value.
fn emit(func: &mut Function, id: InstId, rewrite: Rewrite) -> Result<Value, TransformError> {
    let (block, index) = func
        .position_of(id)
        .ok_or_else(|| TransformError::Invariant(format!("{id} is not placed")))?;
    let binary = |op, lhs, rhs| InstKind::Binary { op, lhs, rhs };
    let (first, second) = match rewrite {
        Rewrite::Add { lhs, rhs, ty } | Rewrite::Sub { lhs, rhs, ty } => {
            let neg = func.insert_inst(
                block,
                index,
                binary(BinaryOp::Sub, Value::int(ty, 0), rhs),
            )?;
            let op = if matches!(rewrite, Rewrite::Add { .. }) {
                BinaryOp::Sub
            } else {
                BinaryOp::Add
            };
            (neg, binary(op, lhs, Value::Inst(neg)))
        }
        Rewrite::MulByThree { operand, ty } => {
            let doubled = func.insert_inst(
                block,
                index,
                binary(BinaryOp::Shl, operand, Value::int(ty, 1)),
            )?;
            (doubled, binary(BinaryOp::Add, Value::Inst(doubled), operand))
        }
    };
    let result = func.insert_inst(block, index + 1, second)?;
    debug!(
        function = %func.name,
        original = %id,
        helper = %first,
        result = %result,
        "substituted"
    );
    Ok(Value::Inst(result))
}

impl Transform for Substitution {
    fn name(&self) -> &'static str {
        crate::config::SUBSTITUTION
    }

    fn apply(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let candidates: Vec<InstId> = func
            .placed_insts()
            .filter(|&(_, id)| plan(func, id).is_some())
            .map(|(_, id)| id)
            .collect();

        let mut rewritten = 0;
        for id in candidates {
            // Operands are read now: earlier rewrites may have replaced them.
            let Some(rewrite) = plan(func, id).flatten() else {
                ctx.record_skipped(1);
                continue;
            };
            if !ctx.rng.random_bool(self.probability) {
                continue;
            }
            let replacement = emit(func, id, rewrite)?;
            func.replace_all_uses(id, replacement);
            func.erase_inst(id)?;
            rewritten += 1;
        }
        ctx.record_transformed(rewritten);
        Ok(rewritten > 0)
    }
}
