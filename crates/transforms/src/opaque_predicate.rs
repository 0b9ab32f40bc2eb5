use crate::config::{PassSettings, OPAQUE_PREDICATE};
use crate::predicate::{emit_condition, emit_filler, PredicateShape};
use crate::{PassContext, Transform};
use rand::{seq::IndexedRandom, Rng};
use tracing::debug;
use veil_core::{
    cfg::{add_phi_incoming_for, is_block_mutable, is_eligible, redirect_terminator},
    BlockId, Function, InstKind,
};
use veil_utils::errors::TransformError;

/// Injects opaque predicates in front of unconditional branches.
///
/// A selected block `B` ending in `br S` is rewritten to branch on a predicate whose outcome
/// is fixed: the live edge still reaches `S`, the other edge reaches a new dead block
/// `B.opaque` that runs filler arithmetic and then falls into `S` as well.
pub struct OpaquePredicate {
    probability: f64,
    min_block_size: usize,
}

impl OpaquePredicate {
    pub const DEFAULT_PROBABILITY: f64 = 0.3;
    pub const DEFAULT_MIN_BLOCK_SIZE: usize = 2;

    pub fn new(settings: &PassSettings) -> Self {
        Self {
            probability: settings.probability.unwrap_or(Self::DEFAULT_PROBABILITY),
            min_block_size: settings
                .min_block_size
                .unwrap_or(Self::DEFAULT_MIN_BLOCK_SIZE),
        }
    }

    /// Branch target when `block` qualifies for a predicate.
    fn branch_target(&self, func: &Function, block: BlockId) -> Option<BlockId> {
        if !is_eligible(func, block, self.min_block_size) || !is_block_mutable(func, block) {
            return None;
        }
        let term = func.terminator(block)?;
        match func.inst(term).ok()?.kind {
            InstKind::Br { target } => Some(target),
            _ => None,
        }
    }
}

impl Default for OpaquePredicate {
    fn default() -> Self {
        Self::new(&PassSettings::default())
    }
}

impl Transform for OpaquePredicate {
    fn name(&self) -> &'static str {
        OPAQUE_PREDICATE
    }

    fn apply(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let entry = func.entry();
        let mut eligible = Vec::new();
        for &block in func.layout() {
            if Some(block) == entry {
                continue;
            }
            match self.branch_target(func, block) {
                Some(target) => eligible.push((block, target)),
                None => ctx.record_skipped(1),
            }
        }

        let mut inserted = 0;
        for (block, succ) in eligible {
            if !ctx.rng.random_bool(self.probability) {
                continue;
            }
            let shape = *PredicateShape::ALL
                .choose(ctx.rng)
                .unwrap_or(&PredicateShape::Equal);
            let cond = emit_condition(func, block, shape, ctx.rng)?;

            let name = format!("{}.opaque", func.block(block)?.name);
            let dead = func.create_block_after(block, name)?;
            emit_filler(func, dead, ctx.rng)?;
            func.push_inst(dead, InstKind::Br { target: succ })?;
            add_phi_incoming_for(func, succ, block, dead)?;

            let (then_dest, else_dest) = if shape.outcome() {
                (succ, dead)
            } else {
                (dead, succ)
            };
            redirect_terminator(
                func,
                block,
                InstKind::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                },
            )?;
            debug!(
                function = %func.name,
                block = %func.block_name(block),
                dead = %func.block_name(dead),
                ?shape,
                "inserted opaque predicate"
            );
            inserted += 1;
        }

        ctx.record_transformed(inserted);
        Ok(inserted > 0)
    }
}
