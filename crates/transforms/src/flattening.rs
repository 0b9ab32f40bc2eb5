//! Control-flow flattening.
//!
//! Turns a multi-block function into a dispatcher loop. Each original non-entry block gets a
//! dense id starting at 1 (layout order). A stack cell holds the id of the next block to run:
//! every block stores its successor's id and jumps to `flatten.dispatch`, which loads the cell
//! and switches on it. Returning blocks keep their `ret`.
//!
//! SSA values are demoted to stack slots first. Once every block is entered only through the
//! dispatcher, a value defined in one original block no longer dominates uses in another.

use crate::config::{PassSettings, FLATTENING};
use crate::{PassContext, Transform};
use indexmap::IndexMap;
use tracing::debug;
use veil_core::{
    cfg::{demote_to_stack, has_unwind, insert_before_terminator, redirect_terminator},
    BlockId, Function, InstKind, Type, Value,
};
use veil_utils::errors::TransformError;

pub const DISPATCH_BLOCK: &str = "flatten.dispatch";
pub const DEFAULT_BLOCK: &str = "flatten.default";

/// Flattens every function with at least two blocks.
#[derive(Debug, Default)]
pub struct Flattening;

impl Flattening {
    /// Flattening has no tunable knobs; probability and block size are ignored.
    pub const fn new(_settings: &PassSettings) -> Self {
        Self
    }
}

/// Assigns dispatch ids to the non-entry blocks in layout order.
fn assign_ids(func: &Function) -> IndexMap<BlockId, u32> {
    func.layout()
        .iter()
        .skip(1)
        .zip(1u32..)
        .map(|(&block, id)| (block, id))
        .collect()
}

impl Transform for Flattening {
    fn name(&self) -> &'static str {
        FLATTENING
    }

    fn apply(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        if func.block_count() < 2 {
            ctx.record_skipped(1);
            return Ok(false);
        }
        if func.layout().iter().any(|&b| has_unwind(func, b)) {
            ctx.warn(format!(
                "{}: landing pads present, function left unflattened",
                func.name
            ));
            ctx.record_skipped(1);
            return Ok(false);
        }
        let entry = func
            .entry()
            .ok_or_else(|| TransformError::Invariant("function has no entry".into()))?;
        // Nothing would ever reach the dispatcher unless the entry block hands off to it.
        match func.terminator(entry).map(|t| func.inst(t)).transpose()?.map(|d| &d.kind) {
            Some(InstKind::Br { .. } | InstKind::CondBr { .. }) => {}
            Some(InstKind::Switch { .. }) => {
                ctx.warn(format!(
                    "{}: entry block ends in a switch, function left unflattened",
                    func.name
                ));
                ctx.record_skipped(1);
                return Ok(false);
            }
            _ => {
                ctx.record_skipped(1);
                return Ok(false);
            }
        }

        let demoted = demote_to_stack(func)?;
        debug!(function = %func.name, ?demoted, "demoted values before flattening");

        let originals: Vec<BlockId> = func.layout().to_vec();
        let ids = assign_ids(func);
        let id_of = |block: BlockId| -> Result<Value, TransformError> {
            ids.get(&block)
                .map(|&id| Value::i32(id as i32))
                .ok_or_else(|| TransformError::Invariant(format!("no dispatch id for {block}")))
        };

        let state = Value::Inst(func.insert_inst(entry, 0, InstKind::Alloca { ty: Type::I32 })?);
        func.insert_inst(
            entry,
            1,
            InstKind::Store {
                value: Value::i32(0),
                ptr: state,
            },
        )?;

        let dispatch = func.create_block(DISPATCH_BLOCK);
        let default = func.create_block(DEFAULT_BLOCK);
        func.push_inst(default, InstKind::Unreachable)?;
        let next = func.push_inst(
            dispatch,
            InstKind::Load {
                ty: Type::I32,
                ptr: state,
            },
        )?;
        let cases = ids.iter().map(|(&b, &id)| (u64::from(id), b)).collect();
        func.push_inst(
            dispatch,
            InstKind::Switch {
                discr: Value::Inst(next),
                default,
                cases,
            },
        )?;

        let mut routed = 0;
        for block in originals {
            let Some(term) = func.terminator(block) else {
                return Err(TransformError::Invariant(format!(
                    "{} has no terminator",
                    func.block_name(block)
                )));
            };
            let next_state = match func.inst(term)?.kind.clone() {
                InstKind::Br { target } => id_of(target)?,
                InstKind::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                } => {
                    if then_dest == else_dest {
                        id_of(then_dest)?
                    } else {
                        let select = insert_before_terminator(
                            func,
                            block,
                            InstKind::Select {
                                cond,
                                on_true: id_of(then_dest)?,
                                on_false: id_of(else_dest)?,
                            },
                        )?;
                        Value::Inst(select)
                    }
                }
                InstKind::Switch { .. } => {
                    ctx.warn(format!(
                        "{}: switch in {} left unflattened",
                        func.name,
                        func.block_name(block)
                    ));
                    ctx.record_skipped(1);
                    continue;
                }
                InstKind::Ret { .. } | InstKind::Unreachable => continue,
                other => {
                    return Err(TransformError::Invariant(format!(
                        "unexpected terminator `{}`",
                        other.mnemonic()
                    )))
                }
            };
            insert_before_terminator(
                func,
                block,
                InstKind::Store {
                    value: next_state,
                    ptr: state,
                },
            )?;
            redirect_terminator(func, block, InstKind::Br { target: dispatch })?;
            routed += 1;
        }

        debug!(
            function = %func.name,
            cases = ids.len(),
            routed,
            "flattened"
        );
        ctx.record_transformed(routed);
        Ok(true)
    }
}
