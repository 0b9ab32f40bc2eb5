//! Opaque predicate construction shared by the opaque-predicate and bogus-flow passes.
//!
//! Every predicate compares a value `k` against a constant derived from it. `k` comes from a
//! Keccak-256 digest of an RNG draw and is rebuilt at runtime as the sum of two constants, so
//! the compared operand is never a bare literal in the output.

use rand::{rngs::StdRng, seq::IndexedRandom, Rng};
use sha3::{Digest, Keccak256};
use tracing::debug;
use veil_core::{
    cfg::insert_before_terminator, BinaryOp, BlockId, CmpPred, Function, InstKind, Type, Value,
};
use veil_utils::errors::IrError;

/// Comparison shapes with a statically known outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateShape {
    /// `k == k`
    Equal,
    /// `k <u k + 1`
    OffByOne,
    /// `k != k ^ m` for non-zero `m`
    Disjoint,
    /// `k >s k`
    StrictlyGreater,
}

impl PredicateShape {
    pub const ALL: [Self; 4] = [
        Self::Equal,
        Self::OffByOne,
        Self::Disjoint,
        Self::StrictlyGreater,
    ];

    /// Value the comparison always produces.
    pub const fn outcome(self) -> bool {
        !matches!(self, Self::StrictlyGreater)
    }
}

/// Derives a non-negative 31-bit constant from `seed`.
pub fn derive_constant(seed: u64) -> u32 {
    let mut hasher = Keccak256::new();
    hasher.update(seed.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) >> 1
}

/// Emits an `i1` comparison of `shape` before the terminator of `block` and returns it.
pub fn emit_condition(
    func: &mut Function,
    block: BlockId,
    shape: PredicateShape,
    rng: &mut StdRng,
) -> Result<Value, IrError> {
    let k = derive_constant(rng.random::<u64>());
    let split = rng.random_range(0..=k);
    let runtime_k = insert_before_terminator(
        func,
        block,
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: Value::int(Type::I32, i64::from(split)),
            rhs: Value::int(Type::I32, i64::from(k - split)),
        },
    )?;

    let (pred, rhs) = match shape {
        PredicateShape::Equal => (CmpPred::Eq, k),
        PredicateShape::OffByOne => (CmpPred::Ult, k + 1),
        PredicateShape::Disjoint => (CmpPred::Ne, k ^ rng.random_range(1..=0xffff_u32)),
        PredicateShape::StrictlyGreater => (CmpPred::Sgt, k),
    };
    let cond = insert_before_terminator(
        func,
        block,
        InstKind::Icmp {
            pred,
            lhs: Value::Inst(runtime_k),
            rhs: Value::int(Type::I32, i64::from(rhs)),
        },
    )?;
    debug!(
        block = %func.block_name(block),
        ?shape,
        k,
        "emitted opaque predicate"
    );
    Ok(Value::Inst(cond))
}

const FILLER_OPS: [BinaryOp; 6] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::Xor,
    BinaryOp::And,
    BinaryOp::Or,
];

/// Appends 2 to 4 `i32` arithmetic instructions to `block` mixing the function's `i32`
/// parameters with constants. Returns the number of instructions emitted.
pub fn emit_filler(func: &mut Function, block: BlockId, rng: &mut StdRng) -> Result<usize, IrError> {
    let params: Vec<Value> = func
        .params
        .iter()
        .enumerate()
        .filter(|(_, ty)| **ty == Type::I32)
        .map(|(i, _)| Value::Param(i as u32))
        .collect();
    let operand = |rng: &mut StdRng| match params.choose(rng) {
        Some(&p) if rng.random_bool(0.5) => p,
        _ => Value::i32(rng.random_range(1..=0xfff)),
    };

    let count = rng.random_range(2..=4);
    let mut acc = operand(rng);
    for _ in 0..count {
        let op = *FILLER_OPS.choose(rng).unwrap_or(&BinaryOp::Add);
        let rhs = operand(rng);
        let id = func.push_inst(block, InstKind::Binary { op, lhs: acc, rhs })?;
        acc = Value::Inst(id);
    }
    Ok(count)
}
