use super::{BinaryOp, BlockId, CmpPred, Function, InstId, InstKind, Type, Value};
use veil_utils::errors::IrError;

/// Appends instructions at the end of a current block.
///
/// Every method returns the new instruction's result as a [`Value`] (or its handle for
/// instructions without a result), so straight-line code reads like the listing it builds.
#[derive(Debug)]
pub struct FunctionBuilder<'f> {
    func: &'f mut Function,
    current: Option<BlockId>,
}

impl<'f> FunctionBuilder<'f> {
    pub fn new(func: &'f mut Function) -> Self {
        Self {
            func,
            current: None,
        }
    }

    /// Creates a block at the end of the layout without switching to it.
    pub fn create_block(&mut self, name: &str) -> BlockId {
        self.func.create_block(name)
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub const fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    pub fn func(&self) -> &Function {
        &*self.func
    }

    fn push(&mut self, kind: InstKind) -> Result<InstId, IrError> {
        let block = self.current.ok_or(IrError::NoInsertionBlock)?;
        self.func.push_inst(block, kind)
    }

    fn push_value(&mut self, kind: InstKind) -> Result<Value, IrError> {
        self.push(kind).map(Value::Inst)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        self.push_value(InstKind::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        self.push_value(InstKind::Icmp { pred, lhs, rhs })
    }

    pub fn select(
        &mut self,
        cond: Value,
        on_true: Value,
        on_false: Value,
    ) -> Result<Value, IrError> {
        self.push_value(InstKind::Select {
            cond,
            on_true,
            on_false,
        })
    }

    pub fn alloca(&mut self, ty: Type) -> Result<Value, IrError> {
        self.push_value(InstKind::Alloca { ty })
    }

    pub fn load(&mut self, ty: Type, ptr: Value) -> Result<Value, IrError> {
        self.push_value(InstKind::Load { ty, ptr })
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> Result<InstId, IrError> {
        self.push(InstKind::Store { value, ptr })
    }

    pub fn gep(&mut self, base: Value, offset: Value) -> Result<Value, IrError> {
        self.push_value(InstKind::Gep { base, offset })
    }

    /// Phi with the given incoming pairs; more can be added with [`Self::add_incoming`].
    pub fn phi(&mut self, ty: Type, incoming: Vec<(BlockId, Value)>) -> Result<Value, IrError> {
        self.push_value(InstKind::Phi { ty, incoming })
    }

    pub fn add_incoming(&mut self, phi: Value, block: BlockId, value: Value) -> Result<(), IrError> {
        let Value::Inst(id) = phi else {
            return Err(IrError::NotAPhi(u32::MAX));
        };
        match &mut self.func.inst_mut(id)?.kind {
            InstKind::Phi { incoming, .. } => {
                incoming.push((block, value));
                Ok(())
            }
            _ => Err(IrError::NotAPhi(id.as_u32())),
        }
    }

    pub fn call(&mut self, callee: &str, args: Vec<Value>, ret: Type) -> Result<Value, IrError> {
        self.push_value(InstKind::Call {
            callee: callee.to_owned(),
            args,
            ret,
        })
    }

    pub fn br(&mut self, target: BlockId) -> Result<InstId, IrError> {
        self.push(InstKind::Br { target })
    }

    pub fn cond_br(
        &mut self,
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    ) -> Result<InstId, IrError> {
        self.push(InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        })
    }

    pub fn switch(
        &mut self,
        discr: Value,
        default: BlockId,
        cases: Vec<(u64, BlockId)>,
    ) -> Result<InstId, IrError> {
        self.push(InstKind::Switch {
            discr,
            default,
            cases,
        })
    }

    pub fn ret(&mut self, value: Option<Value>) -> Result<InstId, IrError> {
        self.push(InstKind::Ret { value })
    }

    pub fn unreachable(&mut self) -> Result<InstId, IrError> {
        self.push(InstKind::Unreachable)
    }
}
