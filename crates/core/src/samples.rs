//! Small reference programs used by tests and the `sample` command.

use crate::ir::{BlockId, CmpPred, Function, FunctionBuilder, Global, Module, Type, Value};
use veil_utils::errors::IrError;

/// `compute(x)`: sums `i * 2` for `i` in `[0, x)` using stack slots for `i` and the sum.
///
/// Blocks: `entry`, `cond`, `body`, `latch`, `exit`.
pub fn compute() -> Result<Function, IrError> {
    let mut f = Function::new("compute", vec![Type::I32], Type::I32);
    let mut b = FunctionBuilder::new(&mut f);
    let entry = b.create_block("entry");
    let cond = b.create_block("cond");
    let body = b.create_block("body");
    let latch = b.create_block("latch");
    let exit = b.create_block("exit");

    b.position_at_end(entry);
    let sum = b.alloca(Type::I32)?;
    let i = b.alloca(Type::I32)?;
    b.store(Value::i32(0), sum)?;
    b.store(Value::i32(0), i)?;
    b.br(cond)?;

    b.position_at_end(cond);
    let iv = b.load(Type::I32, i)?;
    let c = b.icmp(CmpPred::Slt, iv, Value::Param(0))?;
    b.cond_br(c, body, exit)?;

    b.position_at_end(body);
    let iv = b.load(Type::I32, i)?;
    let doubled = b.mul(iv, Value::i32(2))?;
    let s = b.load(Type::I32, sum)?;
    let s = b.add(s, doubled)?;
    b.store(s, sum)?;
    b.br(latch)?;

    b.position_at_end(latch);
    let iv = b.load(Type::I32, i)?;
    let next = b.add(iv, Value::i32(1))?;
    b.store(next, i)?;
    b.br(cond)?;

    b.position_at_end(exit);
    let r = b.load(Type::I32, sum)?;
    b.ret(Some(r))?;
    Ok(f)
}

/// The same loop as [`compute`] written with phis in the loop header.
///
/// Blocks: `entry`, `header`, `body`, `exit`.
pub fn compute_ssa() -> Result<Function, IrError> {
    let mut f = Function::new("compute_ssa", vec![Type::I32], Type::I32);
    let mut b = FunctionBuilder::new(&mut f);
    let entry = b.create_block("entry");
    let header = b.create_block("header");
    let body = b.create_block("body");
    let exit = b.create_block("exit");

    b.position_at_end(entry);
    b.br(header)?;

    b.position_at_end(header);
    let i = b.phi(Type::I32, vec![(entry, Value::i32(0))])?;
    let sum = b.phi(Type::I32, vec![(entry, Value::i32(0))])?;
    let c = b.icmp(CmpPred::Slt, i, Value::Param(0))?;
    b.cond_br(c, body, exit)?;

    b.position_at_end(body);
    let doubled = b.mul(i, Value::i32(2))?;
    let sum_next = b.add(sum, doubled)?;
    let i_next = b.add(i, Value::i32(1))?;
    b.br(header)?;
    b.add_incoming(i, body, i_next)?;
    b.add_incoming(sum, body, sum_next)?;

    b.position_at_end(exit);
    b.ret(Some(sum))?;
    Ok(f)
}

/// `classify(x)`: `-1` for negatives, otherwise a multi-way switch on `x`
/// (`0 -> 10`, `1 -> 20`, anything else `-> 30`).
pub fn classify() -> Result<Function, IrError> {
    let mut f = Function::new("classify", vec![Type::I32], Type::I32);
    let mut b = FunctionBuilder::new(&mut f);
    let entry = b.create_block("entry");
    let neg = b.create_block("negative");
    let sw = b.create_block("dispatch");
    let zero = b.create_block("zero");
    let one = b.create_block("one");
    let other = b.create_block("other");

    b.position_at_end(entry);
    let c = b.icmp(CmpPred::Slt, Value::Param(0), Value::i32(0))?;
    b.cond_br(c, neg, sw)?;

    let arms: [(BlockId, i32); 4] = [(neg, -1), (zero, 10), (one, 20), (other, 30)];
    for (block, value) in arms {
        b.position_at_end(block);
        b.ret(Some(Value::i32(value)))?;
    }

    b.position_at_end(sw);
    b.switch(Value::Param(0), other, vec![(0, zero), (1, one)])?;
    Ok(f)
}

/// `mix(x, y)`: straight-line arithmetic with adds, subs and multiplications by three.
pub fn mix() -> Result<Function, IrError> {
    let mut f = Function::new("mix", vec![Type::I32, Type::I32], Type::I32);
    let mut b = FunctionBuilder::new(&mut f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let a = b.add(Value::Param(0), Value::Param(1))?;
    let d = b.sub(a, Value::i32(7))?;
    let m = b.mul(d, Value::i32(3))?;
    let n = b.mul(Value::i32(3), Value::Param(0))?;
    let r = b.binary(crate::ir::BinaryOp::Xor, m, n)?;
    let r = b.sub(r, Value::Param(1))?;
    b.ret(Some(r))?;
    Ok(f)
}

/// `main()`: measures the `secret` literal, prints a banner and `compute(10)`, returns
/// `compute(10) + strlen(secret)`.
pub fn main_function(module: &Module) -> Result<Function, IrError> {
    let global = |name: &str| {
        module
            .globals
            .id_of(name)
            .map(Value::Global)
            .ok_or_else(|| IrError::UnknownGlobal(name.to_owned()))
    };
    let (secret, banner, fmt) = (global("secret")?, global("banner")?, global("fmt")?);

    let mut f = Function::new("main", vec![], Type::I32);
    let mut b = FunctionBuilder::new(&mut f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let p = b.gep(secret, Value::i64(0))?;
    let len = b.call("strlen", vec![p], Type::I32)?;
    b.call("puts", vec![banner], Type::I32)?;
    let r = b.call("compute", vec![Value::i32(10)], Type::I32)?;
    b.call("printf", vec![fmt, r], Type::I32)?;
    let total = b.add(r, len)?;
    b.ret(Some(total))?;
    Ok(f)
}

/// Module holding every sample plus declarations of the C functions they call.
pub fn sample_module() -> Result<Module, IrError> {
    let mut module = Module::new("sample");
    module.globals.insert("secret", Global::c_string("secret"))?;
    module.globals.insert("banner", Global::c_string("veil sample"))?;
    module.globals.insert("fmt", Global::c_string("result: %d\n"))?;

    module.add_function(Function::new("strlen", vec![Type::Ptr], Type::I32))?;
    module.add_function(Function::new("puts", vec![Type::Ptr], Type::I32))?;
    module.add_function(Function::new("printf", vec![Type::Ptr], Type::I32))?;
    module.add_function(compute()?)?;
    module.add_function(compute_ssa()?)?;
    module.add_function(classify()?)?;
    module.add_function(mix()?)?;
    let main = main_function(&module)?;
    module.add_function(main)?;
    Ok(module)
}
