use super::{first_non_phi, insert_before_terminator, phis};
use crate::ir::{Function, InstId, InstKind, Type, Value};
use tracing::debug;
use veil_utils::errors::IrError;

/// What [`demote_to_stack`] rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoteStats {
    /// Phis replaced by a stack slot.
    pub phis: usize,
    /// Non-entry values whose cross-block uses now go through a stack slot.
    pub values: usize,
}

/// Moves SSA values that cross block boundaries into stack slots.
///
/// Every phi becomes an entry-block `alloca`, a store before each predecessor's terminator
/// and a load at the phi's position. Every other value defined outside the entry block and
/// used in a different block gets a slot, a store right after its definition and a load in
/// front of each out-of-block user. Afterwards the only values that cross blocks are
/// defined in the entry block, which dominates every block no matter how the edges between
/// the other blocks are rewired.
pub fn demote_to_stack(func: &mut Function) -> Result<DemoteStats, IrError> {
    let Some(entry) = func.entry() else {
        return Ok(DemoteStats::default());
    };
    let mut stats = DemoteStats::default();

    // Phis first: after this no block has phis, so cross-block scanning sees plain uses.
    let blocks: Vec<_> = func.layout().to_vec();
    for block in blocks {
        let block_phis = phis(func, block);
        if block_phis.is_empty() {
            continue;
        }
        let mut loads = Vec::with_capacity(block_phis.len());
        for &phi in &block_phis {
            let InstKind::Phi { ty, incoming } = func.inst(phi)?.kind.clone() else {
                continue;
            };
            let slot = Value::Inst(func.insert_inst(entry, 0, InstKind::Alloca { ty })?);
            for (pred, value) in incoming {
                insert_before_terminator(func, pred, InstKind::Store { value, ptr: slot })?;
            }
            let at = first_non_phi(func, block)?;
            let load = func.insert_inst(block, at, InstKind::Load { ty, ptr: slot })?;
            loads.push((phi, load));
        }
        for (phi, load) in loads {
            func.replace_all_uses(phi, Value::Inst(load));
            func.erase_inst(phi)?;
            stats.phis += 1;
        }
    }

    // Cross-block values: collect, then rewrite.
    let positions = func.positions();
    let mut candidates: Vec<(InstId, Type, Vec<InstId>)> = Vec::new();
    for (block, def) in func.placed_insts().collect::<Vec<_>>() {
        if block == entry {
            continue;
        }
        let data = func.inst(def)?;
        if !data.has_value() {
            continue;
        }
        let outside: Vec<InstId> = func
            .uses_of(def)
            .into_iter()
            .filter(|u| positions.get(u).is_some_and(|&(ub, _)| ub != block))
            .collect();
        if !outside.is_empty() {
            candidates.push((def, data.ty, outside));
        }
    }

    for (def, ty, users) in candidates {
        let slot = Value::Inst(func.insert_inst(entry, 0, InstKind::Alloca { ty })?);
        let (def_block, def_index) = func
            .position_of(def)
            .ok_or(IrError::UnknownInstruction(def.as_u32()))?;
        func.insert_inst(
            def_block,
            def_index + 1,
            InstKind::Store {
                value: Value::Inst(def),
                ptr: slot,
            },
        )?;
        for user in users {
            let (user_block, user_index) = func
                .position_of(user)
                .ok_or(IrError::UnknownInstruction(user.as_u32()))?;
            let load = func.insert_inst(user_block, user_index, InstKind::Load { ty, ptr: slot })?;
            for operand in func.inst_mut(user)?.kind.operands_mut() {
                if *operand == Value::Inst(def) {
                    *operand = Value::Inst(load);
                }
            }
        }
        stats.values += 1;
    }

    debug!(
        function = %func.name,
        phis = stats.phis,
        values = stats.values,
        "demoted SSA values to stack slots"
    );
    Ok(stats)
}
