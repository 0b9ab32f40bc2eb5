//! In-memory intermediate representation of a program as functions of basic blocks.
//!
//! A [`Function`] owns two arenas, one of blocks and one of instructions, addressed by the
//! [`BlockId`] and [`InstId`] handles. Handles are never reused: erasing a block or an
//! instruction leaves a hole in its arena, so a stale handle can always be detected. Program
//! order of blocks is kept separately in the function's layout; the first layout block is the
//! entry block. Instructions refer to each other by handle through [`Value`] operands, which
//! gives every result an explicit set of def-use edges.

use serde::{Deserialize, Serialize};
use std::fmt;

mod builder;
mod display;
mod function;
mod inst;
mod module;

pub use builder::FunctionBuilder;
pub use display::FunctionDisplay;
pub use function::{Block, Function, InstData};
pub use inst::{BinaryOp, CmpPred, InstCategory, InstKind};
pub use module::{Global, GlobalTable, Module};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Position of the entity in its arena.
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Raw handle value.
            pub const fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Handle of a basic block within its function.
    BlockId,
    "b"
);
entity_id!(
    /// Handle of an instruction within its function.
    InstId,
    "%"
);
entity_id!(
    /// Handle of a global within its module.
    GlobalId,
    "@"
);

/// Value types. Integers are fixed-width two's-complement bit vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
    Ptr,
    Void,
}

impl Type {
    /// Bit width of an integer type, `None` for pointers and `void`.
    pub const fn bit_width(self) -> Option<u32> {
        match self {
            Self::I1 => Some(1),
            Self::I8 => Some(8),
            Self::I16 => Some(16),
            Self::I32 => Some(32),
            Self::I64 => Some(64),
            Self::Ptr | Self::Void => None,
        }
    }

    pub const fn is_integer(self) -> bool {
        self.bit_width().is_some()
    }

    /// Storage size in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::I1 | Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 => 4,
            Self::I64 | Self::Ptr => 8,
            Self::Void => 0,
        }
    }

    /// Mask selecting the low `bit_width` bits.
    pub const fn mask(self) -> u64 {
        match self.bit_width() {
            Some(64) | None => u64::MAX,
            Some(w) => (1u64 << w) - 1,
        }
    }

    /// Interprets the low bits of `bits` as a signed value of this width.
    pub const fn sign_extend(self, bits: u64) -> i64 {
        match self.bit_width() {
            Some(w) if w < 64 => {
                let shift = 64 - w;
                ((bits << shift) as i64) >> shift
            }
            _ => bits as i64,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I1 => "i1",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Ptr => "ptr",
            Self::Void => "void",
        };
        f.write_str(name)
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Result of another instruction in the same function.
    Inst(InstId),
    /// Function parameter by position.
    Param(u32),
    /// Integer constant; `bits` is already masked to the type's width.
    Const { ty: Type, bits: u64 },
    /// Address of a module global.
    Global(GlobalId),
}

impl Value {
    /// Integer constant of type `ty`, truncated to its width.
    pub const fn int(ty: Type, value: i64) -> Self {
        Self::Const {
            ty,
            bits: (value as u64) & ty.mask(),
        }
    }

    pub const fn i1(value: bool) -> Self {
        Self::int(Type::I1, value as i64)
    }

    pub const fn i32(value: i32) -> Self {
        Self::int(Type::I32, value as i64)
    }

    pub const fn i64(value: i64) -> Self {
        Self::int(Type::I64, value)
    }

    pub const fn as_inst(self) -> Option<InstId> {
        match self {
            Self::Inst(id) => Some(id),
            _ => None,
        }
    }

    /// Constant payload, if this operand is an integer constant.
    pub const fn as_const(self) -> Option<(Type, u64)> {
        match self {
            Self::Const { ty, bits } => Some((ty, bits)),
            _ => None,
        }
    }
}
