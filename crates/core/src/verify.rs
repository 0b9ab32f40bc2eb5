//! Structural and SSA well-formedness checks.
//!
//! The pipeline runs [`verify_function`] before the first pass and after every pass; a
//! failure after a pass discards that pass's changes.

use crate::cfg::{predecessor_map, CfgGraph};
use crate::ir::{Function, InstKind, Module, Value};
use std::collections::{BTreeSet, HashMap};
use veil_utils::errors::VerifyError;

/// Checks one function. Declarations are trivially well formed.
pub fn verify_function(func: &Function) -> Result<(), VerifyError> {
    let Some(entry) = func.entry() else {
        return Ok(());
    };

    // Placement: non-empty blocks, one trailing terminator, leading phis, no duplicates.
    let mut placed = HashMap::new();
    for &b in func.layout() {
        let name = || func.block_name(b);
        let block = func
            .block(b)
            .map_err(|_| VerifyError::DanglingTarget {
                block: name(),
                target: b.as_u32(),
            })?;
        if block.is_empty() {
            return Err(VerifyError::EmptyBlock(name()));
        }
        let last = block.len() - 1;
        let mut seen_non_phi = false;
        for (index, &id) in block.insts().iter().enumerate() {
            if placed.insert(id, (b, index)).is_some() {
                return Err(VerifyError::DuplicatePlacement(id.as_u32()));
            }
            let data = func.inst(id).map_err(|_| VerifyError::DanglingOperand {
                block: name(),
                inst: id.as_u32(),
                operand: id.as_u32(),
            })?;
            let is_term = data.kind.is_terminator();
            if index == last && !is_term {
                return Err(VerifyError::MissingTerminator(name()));
            }
            if index != last && is_term {
                return Err(VerifyError::MisplacedTerminator {
                    block: name(),
                    index,
                });
            }
            if data.kind.is_phi() {
                if seen_non_phi {
                    return Err(VerifyError::MisplacedPhi {
                        block: name(),
                        index,
                    });
                }
            } else {
                seen_non_phi = true;
            }
        }
    }

    // Edges: targets exist, entry is not re-entered, phis agree with predecessors.
    for &b in func.layout() {
        let Some(term) = func.terminator(b) else {
            continue;
        };
        if let Ok(data) = func.inst(term) {
            for target in data.kind.successors() {
                if !func.contains_block(target) {
                    return Err(VerifyError::DanglingTarget {
                        block: func.block_name(b),
                        target: target.as_u32(),
                    });
                }
            }
        }
    }
    let preds = predecessor_map(func);
    if preds.get(&entry).is_some_and(|p| !p.is_empty()) {
        return Err(VerifyError::EntryHasPredecessors(func.block_name(entry)));
    }
    for &b in func.layout() {
        let expected: BTreeSet<_> = preds.get(&b).into_iter().flatten().copied().collect();
        for &id in func.block(b).map(|blk| blk.insts()).unwrap_or_default() {
            if let Ok(InstKind::Phi { incoming, .. }) = func.inst(id).map(|d| &d.kind) {
                let got: BTreeSet<_> = incoming.iter().map(|(p, _)| *p).collect();
                if got != expected {
                    return Err(VerifyError::PhiPredecessorMismatch {
                        block: func.block_name(b),
                        inst: id.as_u32(),
                    });
                }
            }
        }
    }

    // Operands: live, placed, value-producing; parameters in range.
    for (&id, &(b, _)) in &placed {
        let Ok(data) = func.inst(id) else { continue };
        for operand in data.kind.operands() {
            match operand {
                Value::Inst(def) => {
                    let valid = placed.contains_key(&def)
                        && func.inst(def).is_ok_and(|d| d.has_value());
                    if !valid {
                        return Err(VerifyError::DanglingOperand {
                            block: func.block_name(b),
                            inst: id.as_u32(),
                            operand: def.as_u32(),
                        });
                    }
                }
                Value::Param(index) if index as usize >= func.params.len() => {
                    return Err(VerifyError::InvalidParameter {
                        block: func.block_name(b),
                        inst: id.as_u32(),
                        index,
                    });
                }
                _ => {}
            }
        }
    }

    // Dominance over reachable code.
    let cfg = CfgGraph::build(func);
    let reachable = cfg.reachable_blocks();
    let Some(doms) = cfg.dominators() else {
        return Ok(());
    };
    for (&id, &(use_block, use_index)) in &placed {
        if !reachable.contains(&use_block) {
            continue;
        }
        let Ok(data) = func.inst(id) else { continue };
        let not_dominated = |def: u32| VerifyError::NotDominated {
            block: func.block_name(use_block),
            inst: id.as_u32(),
            operand: def,
        };
        match &data.kind {
            InstKind::Phi { incoming, .. } => {
                for (pred, value) in incoming {
                    let Value::Inst(def) = value else { continue };
                    if !reachable.contains(pred) {
                        continue;
                    }
                    let (def_block, _) = placed[def];
                    if !cfg.dominates(&doms, def_block, *pred) {
                        return Err(not_dominated(def.as_u32()));
                    }
                }
            }
            kind => {
                for operand in kind.operands() {
                    let Value::Inst(def) = operand else { continue };
                    let (def_block, def_index) = placed[&def];
                    let ok = if def_block == use_block {
                        def_index < use_index
                    } else {
                        cfg.dominates(&doms, def_block, use_block)
                    };
                    if !ok {
                        return Err(not_dominated(def.as_u32()));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Checks every defined function and that global operands name module globals.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for func in module.functions.values() {
        verify_function(func)?;
        for (_, id) in func.placed_insts() {
            let Ok(data) = func.inst(id) else { continue };
            for operand in data.kind.operands() {
                if let Value::Global(g) = operand {
                    if module.globals.get(g).is_none() {
                        return Err(VerifyError::UnknownGlobal {
                            function: func.name.clone(),
                            global: g.as_u32(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}
