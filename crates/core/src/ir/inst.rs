use super::{BlockId, Type, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use veil_utils::errors::InterpError;

/// Two-operand integer arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    Shl,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// Evaluates the operator on raw bit patterns of type `ty`, wrapping at the type's width.
    pub fn eval(self, ty: Type, lhs: u64, rhs: u64) -> Result<u64, InterpError> {
        let mask = ty.mask();
        let (l, r) = (lhs & mask, rhs & mask);
        let bits = match self {
            Self::Add => l.wrapping_add(r),
            Self::Sub => l.wrapping_sub(r),
            Self::Mul => l.wrapping_mul(r),
            Self::And => l & r,
            Self::Or => l | r,
            Self::Xor => l ^ r,
            Self::Shl => {
                let width = ty.bit_width().unwrap_or(64);
                if r >= u64::from(width) {
                    return Err(InterpError::ShiftOverflow { amount: r, width });
                }
                l << r
            }
            Self::UDiv => {
                if r == 0 {
                    return Err(InterpError::DivisionByZero);
                }
                l / r
            }
            Self::SDiv => {
                let (sl, sr) = (ty.sign_extend(l), ty.sign_extend(r));
                if sr == 0 {
                    return Err(InterpError::DivisionByZero);
                }
                let min = ty.sign_extend(1u64 << (ty.bit_width().unwrap_or(64) - 1));
                if sl == min && sr == -1 {
                    return Err(InterpError::DivisionOverflow);
                }
                (sl / sr) as u64
            }
        };
        Ok(bits & mask)
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::SDiv => "sdiv",
            Self::UDiv => "udiv",
            Self::Shl => "shl",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpPred {
    /// Compares two bit patterns of type `ty`.
    pub const fn eval(self, ty: Type, lhs: u64, rhs: u64) -> bool {
        let mask = ty.mask();
        let (l, r) = (lhs & mask, rhs & mask);
        let (sl, sr) = (ty.sign_extend(l), ty.sign_extend(r));
        match self {
            Self::Eq => l == r,
            Self::Ne => l != r,
            Self::Ult => l < r,
            Self::Ule => l <= r,
            Self::Ugt => l > r,
            Self::Uge => l >= r,
            Self::Slt => sl < sr,
            Self::Sle => sl <= sr,
            Self::Sgt => sl > sr,
            Self::Sge => sl >= sr,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
            Self::Slt => "slt",
            Self::Sle => "sle",
            Self::Sgt => "sgt",
            Self::Sge => "sge",
        }
    }
}

/// Coarse grouping used by eligibility checks and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstCategory {
    Arithmetic,
    Memory,
    Compare,
    Select,
    Phi,
    Call,
    Unwind,
    Terminator,
}

/// Every instruction the IR can express.
///
/// The set is closed: passes match on it exhaustively, so adding a kind forces every pass to
/// decide how to treat it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "inst", rename_all = "snake_case")]
pub enum InstKind {
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Icmp {
        pred: CmpPred,
        lhs: Value,
        rhs: Value,
    },
    Select {
        cond: Value,
        on_true: Value,
        on_false: Value,
    },
    /// Reserves a stack slot holding one value of `ty`; yields its address.
    Alloca {
        ty: Type,
    },
    Load {
        ty: Type,
        ptr: Value,
    },
    Store {
        value: Value,
        ptr: Value,
    },
    /// Byte-offset address arithmetic.
    Gep {
        base: Value,
        offset: Value,
    },
    /// Control-flow join: picks the value paired with the predecessor control came from.
    Phi {
        ty: Type,
        incoming: Vec<(BlockId, Value)>,
    },
    Call {
        callee: String,
        args: Vec<Value>,
        ret: Type,
    },
    /// Exception-handling entry marker; never moved or rewritten.
    LandingPad,
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Switch {
        discr: Value,
        default: BlockId,
        cases: Vec<(u64, BlockId)>,
    },
    Ret {
        value: Option<Value>,
    },
    Unreachable,
}

impl InstKind {
    pub const fn category(&self) -> InstCategory {
        match self {
            Self::Binary { .. } => InstCategory::Arithmetic,
            Self::Icmp { .. } => InstCategory::Compare,
            Self::Select { .. } => InstCategory::Select,
            Self::Alloca { .. } | Self::Load { .. } | Self::Store { .. } | Self::Gep { .. } => {
                InstCategory::Memory
            }
            Self::Phi { .. } => InstCategory::Phi,
            Self::Call { .. } => InstCategory::Call,
            Self::LandingPad => InstCategory::Unwind,
            Self::Br { .. }
            | Self::CondBr { .. }
            | Self::Switch { .. }
            | Self::Ret { .. }
            | Self::Unreachable => InstCategory::Terminator,
        }
    }

    pub const fn is_terminator(&self) -> bool {
        matches!(self.category(), InstCategory::Terminator)
    }

    pub const fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Self::Binary { op, .. } => op.mnemonic(),
            Self::Icmp { .. } => "icmp",
            Self::Select { .. } => "select",
            Self::Alloca { .. } => "alloca",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::Gep { .. } => "gep",
            Self::Phi { .. } => "phi",
            Self::Call { .. } => "call",
            Self::LandingPad => "landingpad",
            Self::Br { .. } => "br",
            Self::CondBr { .. } => "condbr",
            Self::Switch { .. } => "switch",
            Self::Ret { .. } => "ret",
            Self::Unreachable => "unreachable",
        }
    }

    /// Value operands in a fixed order. Phi operands come in incoming order.
    pub fn operands(&self) -> Vec<Value> {
        match self {
            Self::Binary { lhs, rhs, .. } | Self::Icmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::Select {
                cond,
                on_true,
                on_false,
            } => vec![*cond, *on_true, *on_false],
            Self::Load { ptr, .. } => vec![*ptr],
            Self::Store { value, ptr } => vec![*value, *ptr],
            Self::Gep { base, offset } => vec![*base, *offset],
            Self::Phi { incoming, .. } => incoming.iter().map(|(_, v)| *v).collect(),
            Self::Call { args, .. } => args.clone(),
            Self::CondBr { cond, .. } => vec![*cond],
            Self::Switch { discr, .. } => vec![*discr],
            Self::Ret { value } => value.iter().copied().collect(),
            Self::Alloca { .. } | Self::LandingPad | Self::Br { .. } | Self::Unreachable => {
                Vec::new()
            }
        }
    }

    /// Mutable access to the value operands, in the order of [`Self::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Self::Binary { lhs, rhs, .. } | Self::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
            Self::Load { ptr, .. } => vec![ptr],
            Self::Store { value, ptr } => vec![value, ptr],
            Self::Gep { base, offset } => vec![base, offset],
            Self::Phi { incoming, .. } => incoming.iter_mut().map(|(_, v)| v).collect(),
            Self::Call { args, .. } => args.iter_mut().collect(),
            Self::CondBr { cond, .. } => vec![cond],
            Self::Switch { discr, .. } => vec![discr],
            Self::Ret { value } => value.iter_mut().collect(),
            Self::Alloca { .. } | Self::LandingPad | Self::Br { .. } | Self::Unreachable => {
                Vec::new()
            }
        }
    }

    /// Branch targets of a terminator, duplicates included. Empty for non-terminators.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Br { target } => vec![*target],
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            Self::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, b)| *b))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Self::Br { target } => vec![target],
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![then_dest, else_dest],
            Self::Switch { default, cases, .. } => std::iter::once(default)
                .chain(cases.iter_mut().map(|(_, b)| b))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
