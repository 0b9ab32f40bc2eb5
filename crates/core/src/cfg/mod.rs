//! CFG queries and in-place edits shared by the obfuscation passes.
//!
//! Edits keep the function structurally valid between calls where they can: terminators are
//! replaced by building the new one before erasing the old, and block splits move phi edges
//! along with the terminator. Callers that rewire edges by hand are responsible for the phis
//! of the blocks they touch; [`replace_phi_incoming_block`] and [`add_phi_incoming_for`]
//! cover the common cases.

use crate::ir::{BlockId, Function, InstId, InstKind, Value};
use std::collections::HashMap;
use veil_utils::errors::IrError;

mod demote;
mod graph;

pub use demote::{demote_to_stack, DemoteStats};
pub use graph::{CfgGraph, EdgeKind};

/// True when `block` is a live non-entry block with at least `min_size` instructions.
pub fn is_eligible(func: &Function, block: BlockId, min_size: usize) -> bool {
    if func.entry() == Some(block) {
        return false;
    }
    func.block(block).is_ok_and(|b| b.len() >= min_size)
}

/// Appends an empty block at the end of the layout.
pub fn append_block(func: &mut Function, name_hint: &str) -> BlockId {
    func.create_block(name_hint)
}

/// Replaces the terminator of `block` with a new one built from `new_kind`.
///
/// The replacement is placed before the old terminator is erased, so the block is never
/// left without one.
pub fn redirect_terminator(
    func: &mut Function,
    block: BlockId,
    new_kind: InstKind,
) -> Result<InstId, IrError> {
    if !new_kind.is_terminator() {
        return Err(IrError::NotATerminator(new_kind.mnemonic().to_owned()));
    }
    let old = func
        .terminator(block)
        .ok_or_else(|| IrError::MissingTerminator(func.block_name(block)))?;
    let new = func.push_inst(block, new_kind)?;
    func.erase_inst(old)?;
    Ok(new)
}

/// Phis and landing pads must stay where they are.
pub fn is_safe_to_mutate(func: &Function, inst: InstId) -> bool {
    func.inst(inst)
        .is_ok_and(|data| !matches!(data.kind, InstKind::Phi { .. } | InstKind::LandingPad))
}

/// True when every instruction in `block` is safe to mutate.
pub fn is_block_mutable(func: &Function, block: BlockId) -> bool {
    func.block(block)
        .is_ok_and(|b| b.insts().iter().all(|&i| is_safe_to_mutate(func, i)))
}

/// True when `block` contains an exception-handling landing pad.
pub fn has_unwind(func: &Function, block: BlockId) -> bool {
    func.block(block).is_ok_and(|b| {
        b.insts()
            .iter()
            .any(|&i| matches!(func.inst(i).map(|d| &d.kind), Ok(InstKind::LandingPad)))
    })
}

/// Inserts a new instruction directly before the terminator of `block`.
pub fn insert_before_terminator(
    func: &mut Function,
    block: BlockId,
    kind: InstKind,
) -> Result<InstId, IrError> {
    if func.terminator(block).is_none() {
        return Err(IrError::MissingTerminator(func.block_name(block)));
    }
    let index = func.block(block)?.len() - 1;
    func.insert_inst(block, index, kind)
}

/// Index of the first instruction in `block` that is not a phi.
pub fn first_non_phi(func: &Function, block: BlockId) -> Result<usize, IrError> {
    let b = func.block(block)?;
    Ok(b.insts()
        .iter()
        .position(|&i| !func.inst(i).is_ok_and(|d| d.kind.is_phi()))
        .unwrap_or(b.len()))
}

/// Moves `block[index..]` into a new block laid out right after `block`, then ends `block`
/// with an unconditional branch to it.
///
/// Phis in the moved terminator's successors are updated to name the new block. The split
/// point must keep every phi in the head and the terminator in the tail.
pub fn split_block(
    func: &mut Function,
    block: BlockId,
    index: usize,
    name_hint: &str,
) -> Result<BlockId, IrError> {
    let len = func.block(block)?.len();
    if index < first_non_phi(func, block)? || index >= len {
        return Err(IrError::InvalidSplit {
            block: func.block_name(block),
            index,
        });
    }
    let tail = func.create_block_after(block, name_hint)?;
    let moved: Vec<InstId> = func.block_insts_mut(block)?.drain(index..).collect();
    func.block_insts_mut(tail)?.extend(moved);

    for succ in successors(func, tail) {
        replace_phi_incoming_block(func, succ, block, tail)?;
    }
    func.push_inst(block, InstKind::Br { target: tail })?;
    Ok(tail)
}

/// Distinct successors of `block` in terminator order.
pub fn successors(func: &Function, block: BlockId) -> Vec<BlockId> {
    let mut out = Vec::new();
    if let Some(term) = func.terminator(block) {
        if let Ok(data) = func.inst(term) {
            for s in data.kind.successors() {
                if !out.contains(&s) {
                    out.push(s);
                }
            }
        }
    }
    out
}

/// Distinct predecessors of `block` in layout order.
pub fn predecessors(func: &Function, block: BlockId) -> Vec<BlockId> {
    func.layout()
        .iter()
        .copied()
        .filter(|&b| successors(func, b).contains(&block))
        .collect()
}

/// Predecessor lists for every laid-out block.
pub fn predecessor_map(func: &Function) -> HashMap<BlockId, Vec<BlockId>> {
    let mut map: HashMap<BlockId, Vec<BlockId>> =
        func.layout().iter().map(|&b| (b, Vec::new())).collect();
    for &b in func.layout() {
        for s in successors(func, b) {
            map.entry(s).or_default().push(b);
        }
    }
    map
}

/// Phi instructions at the head of `block`.
pub fn phis(func: &Function, block: BlockId) -> Vec<InstId> {
    func.block(block)
        .map(|b| {
            b.insts()
                .iter()
                .copied()
                .take_while(|&i| func.inst(i).is_ok_and(|d| d.kind.is_phi()))
                .collect()
        })
        .unwrap_or_default()
}

/// Renames incoming block `old` to `new` in every phi of `block`.
pub fn replace_phi_incoming_block(
    func: &mut Function,
    block: BlockId,
    old: BlockId,
    new: BlockId,
) -> Result<(), IrError> {
    for phi in phis(func, block) {
        if let InstKind::Phi { incoming, .. } = &mut func.inst_mut(phi)?.kind {
            for (pred, _) in incoming.iter_mut() {
                if *pred == old {
                    *pred = new;
                }
            }
        }
    }
    Ok(())
}

/// Gives every phi of `block` an incoming entry for `new_pred` carrying the value it
/// already receives from `existing_pred`.
pub fn add_phi_incoming_for(
    func: &mut Function,
    block: BlockId,
    existing_pred: BlockId,
    new_pred: BlockId,
) -> Result<(), IrError> {
    for phi in phis(func, block) {
        if let InstKind::Phi { incoming, .. } = &mut func.inst_mut(phi)?.kind {
            let value: Option<Value> = incoming
                .iter()
                .find(|(pred, _)| *pred == existing_pred)
                .map(|(_, v)| *v);
            match value {
                Some(v) => incoming.push((new_pred, v)),
                None => return Err(IrError::UnknownBlock(existing_pred.as_u32())),
            }
        }
    }
    Ok(())
}
