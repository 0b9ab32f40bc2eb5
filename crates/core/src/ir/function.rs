use super::{BlockId, InstId, InstKind, Type, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use veil_utils::errors::IrError;

/// A basic block: a name hint plus the ordered instructions placed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Human-readable label. Not required to be unique; printing appends the block id.
    pub name: String,
    insts: Vec<InstId>,
}

impl Block {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insts: Vec::new(),
        }
    }

    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

/// An instruction and the type of the value it produces (`void` for none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstData {
    pub kind: InstKind,
    pub ty: Type,
}

impl InstData {
    pub const fn has_value(&self) -> bool {
        !matches!(self.ty, Type::Void)
    }
}

/// A function body. Without blocks it is a declaration of an external symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    blocks: Vec<Option<Block>>,
    insts: Vec<Option<InstData>>,
    layout: Vec<BlockId>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            blocks: Vec::new(),
            insts: Vec::new(),
            layout: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    /// The first block in layout order.
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Blocks in program order.
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    /// Number of instructions placed in laid-out blocks.
    pub fn inst_count(&self) -> usize {
        self.layout
            .iter()
            .filter_map(|&b| self.blocks.get(b.index()).and_then(Option::as_ref))
            .map(Block::len)
            .sum()
    }

    pub fn block(&self, id: BlockId) -> Result<&Block, IrError> {
        self.blocks
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(IrError::UnknownBlock(id.0))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut Block, IrError> {
        self.blocks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(IrError::UnknownBlock(id.0))
    }

    /// Label used in diagnostics; falls back to the handle for erased blocks.
    pub fn block_name(&self, id: BlockId) -> String {
        match self.block(id) {
            Ok(block) => format!("{}#{}", block.name, id.0),
            Err(_) => id.to_string(),
        }
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        self.block(id).is_ok() && self.layout.contains(&id)
    }

    pub fn inst(&self, id: InstId) -> Result<&InstData, IrError> {
        self.insts
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(IrError::UnknownInstruction(id.0))
    }

    pub fn inst_mut(&mut self, id: InstId) -> Result<&mut InstData, IrError> {
        self.insts
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(IrError::UnknownInstruction(id.0))
    }

    /// Appends a new empty block to the end of the layout.
    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(Block::new(name)));
        self.layout.push(id);
        id
    }

    /// Creates a new empty block placed directly after `after` in the layout.
    pub fn create_block_after(
        &mut self,
        after: BlockId,
        name: impl Into<String>,
    ) -> Result<BlockId, IrError> {
        let pos = self
            .layout
            .iter()
            .position(|&b| b == after)
            .ok_or(IrError::UnknownBlock(after.0))?;
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(Block::new(name)));
        self.layout.insert(pos + 1, id);
        Ok(id)
    }

    /// Type of an operand in this function, if it can be resolved.
    pub fn value_type(&self, value: Value) -> Option<Type> {
        match value {
            Value::Inst(id) => self.inst(id).ok().map(|data| data.ty),
            Value::Param(index) => self.params.get(index as usize).copied(),
            Value::Const { ty, .. } => Some(ty),
            Value::Global(_) => Some(Type::Ptr),
        }
    }

    fn operand_type(&self, value: Value) -> Result<Type, IrError> {
        match value {
            Value::Inst(id) => Ok(self.inst(id)?.ty),
            Value::Param(index) => self
                .params
                .get(index as usize)
                .copied()
                .ok_or(IrError::InvalidParameter(index)),
            Value::Const { ty, .. } => Ok(ty),
            Value::Global(_) => Ok(Type::Ptr),
        }
    }

    /// Result type an instruction of `kind` produces in this function.
    pub fn result_type(&self, kind: &InstKind) -> Result<Type, IrError> {
        Ok(match kind {
            InstKind::Binary { lhs, .. } => self.operand_type(*lhs)?,
            InstKind::Icmp { .. } => Type::I1,
            InstKind::Select { on_true, .. } => self.operand_type(*on_true)?,
            InstKind::Alloca { .. } | InstKind::Gep { .. } | InstKind::LandingPad => Type::Ptr,
            InstKind::Load { ty, .. } | InstKind::Phi { ty, .. } => *ty,
            InstKind::Call { ret, .. } => *ret,
            InstKind::Store { .. }
            | InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Switch { .. }
            | InstKind::Ret { .. }
            | InstKind::Unreachable => Type::Void,
        })
    }

    /// Allocates an instruction in the arena without placing it in a block.
    pub fn create_inst(&mut self, kind: InstKind) -> Result<InstId, IrError> {
        let ty = self.result_type(&kind)?;
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Some(InstData { kind, ty }));
        Ok(id)
    }

    /// Creates an instruction and places it at `index` within `block`.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
    ) -> Result<InstId, IrError> {
        let len = self.block(block)?.len();
        if index > len {
            return Err(IrError::InvalidSplit {
                block: self.block_name(block),
                index,
            });
        }
        let id = self.create_inst(kind)?;
        self.block_insts_mut(block)?.insert(index, id);
        Ok(id)
    }

    /// Creates an instruction and appends it to `block`.
    pub fn push_inst(&mut self, block: BlockId, kind: InstKind) -> Result<InstId, IrError> {
        let len = self.block(block)?.len();
        self.insert_inst(block, len, kind)
    }

    /// The block's last instruction, if it is a terminator.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.block(block).ok()?.insts.last()?;
        self.inst(last)
            .ok()
            .filter(|data| data.kind.is_terminator())
            .map(|_| last)
    }

    /// Placed instructions that read the result of `id`.
    pub fn uses_of(&self, id: InstId) -> Vec<InstId> {
        self.placed_insts()
            .filter(|&(_, user)| {
                self.inst(user)
                    .map(|data| data.kind.operands().contains(&Value::Inst(id)))
                    .unwrap_or(false)
            })
            .map(|(_, user)| user)
            .collect()
    }

    /// Rewrites every operand equal to `Value::Inst(from)` to `to`. Returns the rewrite count.
    pub fn replace_all_uses(&mut self, from: InstId, to: Value) -> usize {
        let target = Value::Inst(from);
        let mut count = 0;
        for data in self.insts.iter_mut().flatten() {
            for operand in data.kind.operands_mut() {
                if *operand == target {
                    *operand = to;
                    count += 1;
                }
            }
        }
        count
    }

    /// Removes an instruction from its block and the arena.
    ///
    /// Refuses while any placed instruction still uses the result; callers redirect uses
    /// first.
    pub fn erase_inst(&mut self, id: InstId) -> Result<(), IrError> {
        self.inst(id)?;
        let users = self.uses_of(id).into_iter().filter(|&u| u != id).count();
        if users > 0 {
            return Err(IrError::InstructionInUse { inst: id.0, users });
        }
        if let Some((block, index)) = self.position_of(id) {
            self.block_insts_mut(block)?.remove(index);
        }
        self.insts[id.index()] = None;
        Ok(())
    }

    /// Block and index where `id` is placed.
    pub fn position_of(&self, id: InstId) -> Option<(BlockId, usize)> {
        self.layout.iter().find_map(|&b| {
            self.block(b)
                .ok()?
                .insts
                .iter()
                .position(|&i| i == id)
                .map(|index| (b, index))
        })
    }

    /// Positions of every placed instruction.
    pub fn positions(&self) -> HashMap<InstId, (BlockId, usize)> {
        let mut map = HashMap::new();
        for &b in &self.layout {
            if let Ok(block) = self.block(b) {
                for (index, &id) in block.insts.iter().enumerate() {
                    map.entry(id).or_insert((b, index));
                }
            }
        }
        map
    }

    /// `(block, inst)` pairs in layout order.
    pub fn placed_insts(&self) -> impl Iterator<Item = (BlockId, InstId)> + '_ {
        self.layout.iter().flat_map(move |&b| {
            self.block(b)
                .map(|block| block.insts.clone())
                .unwrap_or_default()
                .into_iter()
                .map(move |i| (b, i))
        })
    }

    /// Set of instruction handles placed in the layout; the basis of exact add/remove counts.
    pub fn live_inst_ids(&self) -> BTreeSet<InstId> {
        self.placed_insts().map(|(_, id)| id).collect()
    }

    pub(crate) fn block_insts_mut(&mut self, id: BlockId) -> Result<&mut Vec<InstId>, IrError> {
        Ok(&mut self.block_mut(id)?.insts)
    }
}
