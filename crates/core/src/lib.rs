//! Core IR for the veil obfuscator: the function/block/instruction model, CFG utilities,
//! the well-formedness verifier and a reference interpreter.

pub mod cfg;
pub mod interp;
pub mod ir;
pub mod samples;
pub mod verify;

pub use ir::{
    BinaryOp, Block, BlockId, CmpPred, Function, FunctionBuilder, Global, GlobalId, GlobalTable,
    InstCategory, InstData, InstId, InstKind, Module, Type, Value,
};
