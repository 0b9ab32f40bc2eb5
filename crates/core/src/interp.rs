//! Reference interpreter for the IR.
//!
//! Executes a module function on integer arguments with wrapping integer semantics, one
//! stack slot per `alloca`, byte-addressed global memory and a small set of C library
//! externals. It exists to check that rewritten functions still compute the same results,
//! so it favours explicit errors over guessing: reading an unwritten slot, running off the
//! end of an object or exceeding the step budget all fail the call.

use crate::ir::{BlockId, Function, GlobalId, InstId, InstKind, Module, Type, Value};
use std::collections::{HashMap, HashSet};
use tracing::trace;
use veil_utils::errors::InterpError;

/// Default instruction budget per top-level call.
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;
/// Default maximum call nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Object a pointer points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// A stack slot created by `alloca`.
    Stack(usize),
    /// A module global.
    Global(GlobalId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub base: Base,
    pub offset: i64,
}

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtValue {
    Int { ty: Type, bits: u64 },
    Ptr(Pointer),
}

impl RtValue {
    pub const fn int(ty: Type, value: i64) -> Self {
        Self::Int {
            ty,
            bits: (value as u64) & ty.mask(),
        }
    }

    fn as_bits(self) -> Result<u64, InterpError> {
        match self {
            Self::Int { bits, .. } => Ok(bits),
            Self::Ptr(_) => Err(InterpError::TypeMismatch(
                "expected an integer, found a pointer".into(),
            )),
        }
    }

    fn as_ptr(self) -> Result<Pointer, InterpError> {
        match self {
            Self::Ptr(p) => Ok(p),
            Self::Int { .. } => Err(InterpError::TypeMismatch(
                "expected a pointer, found an integer".into(),
            )),
        }
    }

    /// Signed view of an integer value.
    pub fn as_i64(self) -> Result<i64, InterpError> {
        match self {
            Self::Int { ty, bits } => Ok(ty.sign_extend(bits)),
            Self::Ptr(_) => Err(InterpError::TypeMismatch(
                "expected an integer, found a pointer".into(),
            )),
        }
    }
}

/// Stack slots plus a private copy of every global's bytes.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    slots: Vec<Option<RtValue>>,
    globals: Vec<Vec<u8>>,
    constant: Vec<bool>,
    names: Vec<String>,
}

impl Memory {
    /// Loads the module's globals. With `decode` set, XOR-encoded globals are materialized
    /// as plaintext, standing in for the runtime decode step the IR does not contain.
    fn from_module(module: &Module, decode: bool) -> Self {
        let mut memory = Self::default();
        for (_, name, global) in module.globals.iter() {
            let bytes = if decode {
                global.plaintext()
            } else {
                global.data.clone()
            };
            memory.globals.push(bytes);
            memory.constant.push(global.constant);
            memory.names.push(name.to_owned());
        }
        memory
    }

    fn alloc(&mut self) -> Pointer {
        self.slots.push(None);
        Pointer {
            base: Base::Stack(self.slots.len() - 1),
            offset: 0,
        }
    }

    fn global_bytes(&self, id: GlobalId) -> Result<&Vec<u8>, InterpError> {
        self.globals
            .get(id.index())
            .ok_or_else(|| InterpError::InvalidPointer(format!("no global {id}")))
    }

    fn byte_range(&self, ptr: Pointer, len: usize) -> Result<(GlobalId, usize), InterpError> {
        let Base::Global(id) = ptr.base else {
            return Err(InterpError::InvalidPointer(
                "byte access to a stack slot".into(),
            ));
        };
        let size = self.global_bytes(id)?.len();
        let start = usize::try_from(ptr.offset)
            .map_err(|_| InterpError::InvalidPointer(format!("negative offset {}", ptr.offset)))?;
        if start + len > size {
            return Err(InterpError::InvalidPointer(format!(
                "{len} byte(s) at offset {start} of {size}-byte global"
            )));
        }
        Ok((id, start))
    }

    pub fn load(&self, ty: Type, ptr: Pointer) -> Result<RtValue, InterpError> {
        match ptr.base {
            Base::Stack(slot) => {
                if ptr.offset != 0 {
                    return Err(InterpError::InvalidPointer(format!(
                        "offset {} into a stack slot",
                        ptr.offset
                    )));
                }
                self.slots
                    .get(slot)
                    .copied()
                    .ok_or_else(|| InterpError::InvalidPointer(format!("no stack slot {slot}")))?
                    .ok_or(InterpError::UninitializedSlot)
            }
            Base::Global(_) => {
                if !ty.is_integer() {
                    return Err(InterpError::Unsupported(format!("load {ty} from a global")));
                }
                let len = ty.byte_size();
                let (id, start) = self.byte_range(ptr, len)?;
                let bytes = &self.globals[id.index()][start..start + len];
                let bits = bytes
                    .iter()
                    .rev()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
                Ok(RtValue::Int {
                    ty,
                    bits: bits & ty.mask(),
                })
            }
        }
    }

    pub fn store(&mut self, value: RtValue, ptr: Pointer) -> Result<(), InterpError> {
        match ptr.base {
            Base::Stack(slot) => {
                if ptr.offset != 0 {
                    return Err(InterpError::InvalidPointer(format!(
                        "offset {} into a stack slot",
                        ptr.offset
                    )));
                }
                let cell = self
                    .slots
                    .get_mut(slot)
                    .ok_or_else(|| InterpError::InvalidPointer(format!("no stack slot {slot}")))?;
                *cell = Some(value);
                Ok(())
            }
            Base::Global(id) => {
                let RtValue::Int { ty, bits } = value else {
                    return Err(InterpError::Unsupported("store a pointer into a global".into()));
                };
                let bytes: Vec<u8> = (0..ty.byte_size()).map(|i| (bits >> (8 * i)) as u8).collect();
                self.write_bytes(Pointer { base: Base::Global(id), offset: ptr.offset }, &bytes)
            }
        }
    }

    /// Bytes from `ptr` up to (not including) the next NUL.
    pub fn read_c_string(&self, ptr: Pointer) -> Result<Vec<u8>, InterpError> {
        let (id, start) = self.byte_range(ptr, 0)?;
        let bytes = &self.globals[id.index()][start..];
        match bytes.iter().position(|&b| b == 0) {
            Some(end) => Ok(bytes[..end].to_vec()),
            None => Err(InterpError::InvalidPointer(format!(
                "unterminated string in `{}`",
                self.names[id.index()]
            ))),
        }
    }

    pub fn write_bytes(&mut self, ptr: Pointer, bytes: &[u8]) -> Result<(), InterpError> {
        let (id, start) = self.byte_range(ptr, bytes.len())?;
        if self.constant[id.index()] {
            return Err(InterpError::StoreToConstant(self.names[id.index()].clone()));
        }
        self.globals[id.index()][start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Current bytes of a global.
    pub fn global(&self, id: GlobalId) -> Option<&[u8]> {
        self.globals.get(id.index()).map(Vec::as_slice)
    }
}

/// Functions provided by the host rather than the module.
pub trait Externals {
    /// Runs `name`. Returns [`InterpError::UnknownFunction`] for names it does not provide.
    fn call(
        &mut self,
        name: &str,
        args: &[RtValue],
        memory: &mut Memory,
    ) -> Result<Option<RtValue>, InterpError>;
}

/// One recorded call into a host external.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCall {
    pub callee: String,
    /// C strings read from the pointer arguments, in argument order.
    pub strings: Vec<Vec<u8>>,
}

/// `strlen`, `puts`, `printf`, `strcmp` and `strcpy` over interpreter memory, with output
/// captured instead of printed.
#[derive(Debug, Clone, Default)]
pub struct HostExternals {
    pub calls: Vec<ExternalCall>,
    pub stdout: String,
}

impl HostExternals {
    fn string_arg(args: &[RtValue], index: usize, memory: &Memory) -> Result<Vec<u8>, InterpError> {
        let ptr = args
            .get(index)
            .ok_or_else(|| InterpError::Malformed(format!("missing argument {index}")))?
            .as_ptr()?;
        memory.read_c_string(ptr)
    }
}

impl Externals for HostExternals {
    fn call(
        &mut self,
        name: &str,
        args: &[RtValue],
        memory: &mut Memory,
    ) -> Result<Option<RtValue>, InterpError> {
        let strings: Vec<Vec<u8>> = args
            .iter()
            .filter_map(|a| match a {
                RtValue::Ptr(p) => memory.read_c_string(*p).ok(),
                RtValue::Int { .. } => None,
            })
            .collect();
        let result = match name {
            "strlen" => {
                let s = Self::string_arg(args, 0, memory)?;
                Some(RtValue::int(Type::I64, s.len() as i64))
            }
            "puts" => {
                let s = Self::string_arg(args, 0, memory)?;
                self.stdout.push_str(&String::from_utf8_lossy(&s));
                self.stdout.push('\n');
                Some(RtValue::int(Type::I32, s.len() as i64 + 1))
            }
            "printf" => {
                let fmt = Self::string_arg(args, 0, memory)?;
                let text = format_printf(&fmt, &args[1..], memory)?;
                self.stdout.push_str(&text);
                Some(RtValue::int(Type::I32, text.len() as i64))
            }
            "strcmp" => {
                let a = Self::string_arg(args, 0, memory)?;
                let b = Self::string_arg(args, 1, memory)?;
                Some(RtValue::int(Type::I32, a.cmp(&b) as i64))
            }
            "strcpy" => {
                let dst = args
                    .first()
                    .ok_or_else(|| InterpError::Malformed("strcpy without arguments".into()))?
                    .as_ptr()?;
                let mut src = Self::string_arg(args, 1, memory)?;
                src.push(0);
                memory.write_bytes(dst, &src)?;
                Some(RtValue::Ptr(dst))
            }
            other => return Err(InterpError::UnknownFunction(other.to_owned())),
        };
        self.calls.push(ExternalCall {
            callee: name.to_owned(),
            strings,
        });
        Ok(result)
    }
}

/// Minimal `printf`: `%d %i %u %x %c %s %%` with optional `l`/`ll` length modifiers.
fn format_printf(fmt: &[u8], args: &[RtValue], memory: &Memory) -> Result<String, InterpError> {
    let mut out = Vec::new();
    let mut next = args.iter();
    let mut i = 0;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        while i < fmt.len() && fmt[i] == b'l' {
            i += 1;
        }
        let Some(&conv) = fmt.get(i) else { break };
        i += 1;
        if conv == b'%' {
            out.push(b'%');
            continue;
        }
        let arg = *next
            .next()
            .ok_or_else(|| InterpError::Malformed("printf is missing an argument".into()))?;
        match conv {
            b'd' | b'i' => out.extend(arg.as_i64()?.to_string().bytes()),
            b'u' => out.extend(arg.as_bits()?.to_string().bytes()),
            b'x' => out.extend(format!("{:x}", arg.as_bits()?).bytes()),
            b'c' => out.push(arg.as_bits()? as u8),
            b's' => out.extend(memory.read_c_string(arg.as_ptr()?)?),
            other => {
                return Err(InterpError::Unsupported(format!(
                    "printf conversion %{}",
                    other as char
                )))
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Executes functions of one module. Memory, captured output and the block trace persist
/// across calls on the same interpreter.
#[derive(Debug)]
pub struct Interpreter<'m, E = HostExternals> {
    module: &'m Module,
    memory: Memory,
    externals: E,
    step_limit: usize,
    max_depth: usize,
    steps: usize,
    visited: HashMap<String, HashMap<BlockId, usize>>,
}

impl<'m> Interpreter<'m, HostExternals> {
    pub fn new(module: &'m Module) -> Self {
        Self::with_externals(module, HostExternals::default())
    }
}

impl<'m, E: Externals> Interpreter<'m, E> {
    pub fn with_externals(module: &'m Module, externals: E) -> Self {
        Self {
            module,
            memory: Memory::from_module(module, true),
            externals,
            step_limit: DEFAULT_STEP_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
            steps: 0,
            visited: HashMap::new(),
        }
    }

    pub const fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Exposes globals exactly as stored, without undoing XOR encoding.
    pub fn with_raw_globals(mut self) -> Self {
        self.memory = Memory::from_module(self.module, false);
        self
    }

    pub const fn externals(&self) -> &E {
        &self.externals
    }

    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Instructions executed by the most recent top-level call.
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// Blocks of `function` entered so far.
    pub fn visited_blocks(&self, function: &str) -> HashSet<BlockId> {
        self.visited
            .get(function)
            .map(|counts| counts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// How many times each block of `function` has been entered so far.
    pub fn block_visits(&self, function: &str) -> HashMap<BlockId, usize> {
        self.visited.get(function).cloned().unwrap_or_default()
    }

    /// Calls `name` with integer arguments and returns its signed integer result, if any.
    pub fn call(&mut self, name: &str, args: &[i64]) -> Result<Option<i64>, InterpError> {
        let func = self.defined(name)?;
        if func.params.len() != args.len() {
            return Err(InterpError::ArityMismatch {
                function: name.to_owned(),
                expected: func.params.len(),
                found: args.len(),
            });
        }
        let args = func
            .params
            .iter()
            .zip(args)
            .map(|(ty, &v)| {
                if ty.is_integer() {
                    Ok(RtValue::int(*ty, v))
                } else {
                    Err(InterpError::TypeMismatch(format!(
                        "parameter of type {ty} cannot take an integer"
                    )))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.steps = 0;
        match self.run(func, args, 0)? {
            Some(v) => v.as_i64().map(Some),
            None => Ok(None),
        }
    }

    fn defined(&self, name: &str) -> Result<&'m Function, InterpError> {
        self.module
            .function(name)
            .filter(|f| !f.is_declaration())
            .ok_or_else(|| InterpError::UnknownFunction(name.to_owned()))
    }

    fn eval(
        &self,
        func: &Function,
        values: &HashMap<InstId, RtValue>,
        args: &[RtValue],
        v: Value,
    ) -> Result<RtValue, InterpError> {
        match v {
            Value::Inst(id) => values
                .get(&id)
                .copied()
                .ok_or(InterpError::UndefinedValue(id.as_u32())),
            Value::Param(i) => args.get(i as usize).copied().ok_or_else(|| {
                InterpError::Malformed(format!("`{}` has no parameter {i}", func.name))
            }),
            Value::Const { ty, bits } => Ok(RtValue::Int { ty, bits }),
            Value::Global(id) => Ok(RtValue::Ptr(Pointer {
                base: Base::Global(id),
                offset: 0,
            })),
        }
    }

    fn run(
        &mut self,
        func: &'m Function,
        args: Vec<RtValue>,
        depth: usize,
    ) -> Result<Option<RtValue>, InterpError> {
        if depth > self.max_depth {
            return Err(InterpError::CallDepth(self.max_depth));
        }
        let malformed = |what: String| InterpError::Malformed(what);
        let mut block = func
            .entry()
            .ok_or_else(|| InterpError::UnknownFunction(func.name.clone()))?;
        let mut prev: Option<BlockId> = None;
        let mut values: HashMap<InstId, RtValue> = HashMap::new();

        loop {
            *self
                .visited
                .entry(func.name.clone())
                .or_default()
                .entry(block)
                .or_default() += 1;
            let insts = func
                .block(block)
                .map_err(|e| malformed(e.to_string()))?
                .insts()
                .to_vec();

            // Phis read their inputs as of block entry, all at once.
            let mut start = 0;
            let mut incoming_values = Vec::new();
            while let Some(&id) = insts.get(start) {
                let data = func.inst(id).map_err(|e| malformed(e.to_string()))?;
                let InstKind::Phi { incoming, .. } = &data.kind else {
                    break;
                };
                let from = prev.ok_or_else(|| malformed("phi in entry block".into()))?;
                let (_, v) = incoming
                    .iter()
                    .find(|(p, _)| *p == from)
                    .ok_or_else(|| malformed(format!("phi {id} has no edge from {from}")))?;
                incoming_values.push((id, self.eval(func, &values, &args, *v)?));
                start += 1;
            }
            values.extend(incoming_values);

            let mut next = None;
            for &id in &insts[start..] {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(InterpError::StepLimit(self.step_limit));
                }
                let data = func.inst(id).map_err(|e| malformed(e.to_string()))?;
                let ev = |v: Value| self.eval(func, &values, &args, v);
                let result = match &data.kind {
                    InstKind::Binary { op, lhs, rhs } => {
                        let bits = op.eval(data.ty, ev(*lhs)?.as_bits()?, ev(*rhs)?.as_bits()?)?;
                        Some(RtValue::Int { ty: data.ty, bits })
                    }
                    InstKind::Icmp { pred, lhs, rhs } => {
                        let (l, r) = (ev(*lhs)?, ev(*rhs)?);
                        let holds = match (l, r) {
                            (RtValue::Int { ty, bits: a }, RtValue::Int { bits: b, .. }) => {
                                pred.eval(ty, a, b)
                            }
                            (RtValue::Ptr(a), RtValue::Ptr(b)) => match pred {
                                crate::ir::CmpPred::Eq => a == b,
                                crate::ir::CmpPred::Ne => a != b,
                                _ => {
                                    return Err(InterpError::Unsupported(
                                        "ordered pointer comparison".into(),
                                    ))
                                }
                            },
                            _ => {
                                return Err(InterpError::TypeMismatch(
                                    "icmp between pointer and integer".into(),
                                ))
                            }
                        };
                        Some(RtValue::int(Type::I1, i64::from(holds)))
                    }
                    InstKind::Select {
                        cond,
                        on_true,
                        on_false,
                    } => {
                        let chosen = if ev(*cond)?.as_bits()? & 1 == 1 {
                            on_true
                        } else {
                            on_false
                        };
                        Some(ev(*chosen)?)
                    }
                    InstKind::Alloca { .. } => Some(RtValue::Ptr(self.memory.alloc())),
                    InstKind::Load { ty, ptr } => {
                        let ptr = ev(*ptr)?.as_ptr()?;
                        Some(self.memory.load(*ty, ptr)?)
                    }
                    InstKind::Store { value, ptr } => {
                        let (value, ptr) = (ev(*value)?, ev(*ptr)?.as_ptr()?);
                        self.memory.store(value, ptr)?;
                        None
                    }
                    InstKind::Gep { base, offset } => {
                        let mut p = ev(*base)?.as_ptr()?;
                        p.offset = p.offset.wrapping_add(ev(*offset)?.as_i64()?);
                        Some(RtValue::Ptr(p))
                    }
                    InstKind::Phi { .. } => {
                        return Err(malformed(format!("phi {id} after non-phi instructions")))
                    }
                    InstKind::Call {
                        callee,
                        args: call_args,
                        ret,
                    } => {
                        let call_args = call_args
                            .iter()
                            .map(|a| ev(*a))
                            .collect::<Result<Vec<_>, _>>()?;
                        let out = match self.module.function(callee) {
                            Some(target) if !target.is_declaration() => {
                                if target.params.len() != call_args.len() {
                                    return Err(InterpError::ArityMismatch {
                                        function: callee.clone(),
                                        expected: target.params.len(),
                                        found: call_args.len(),
                                    });
                                }
                                trace!(caller = %func.name, %callee, "call");
                                self.run(target, call_args, depth + 1)?
                            }
                            _ => self.externals.call(callee, &call_args, &mut self.memory)?,
                        };
                        match (out, ret) {
                            (_, Type::Void) => None,
                            (Some(RtValue::Int { bits, .. }), ty) if ty.is_integer() => {
                                Some(RtValue::Int {
                                    ty: *ty,
                                    bits: bits & ty.mask(),
                                })
                            }
                            (Some(v), _) => Some(v),
                            (None, _) => {
                                return Err(InterpError::TypeMismatch(format!(
                                    "`{callee}` returned no value"
                                )))
                            }
                        }
                    }
                    InstKind::LandingPad => {
                        return Err(InterpError::Unsupported("landingpad".into()))
                    }
                    InstKind::Br { target } => {
                        next = Some(*target);
                        None
                    }
                    InstKind::CondBr {
                        cond,
                        then_dest,
                        else_dest,
                    } => {
                        next = Some(if ev(*cond)?.as_bits()? & 1 == 1 {
                            *then_dest
                        } else {
                            *else_dest
                        });
                        None
                    }
                    InstKind::Switch {
                        discr,
                        default,
                        cases,
                    } => {
                        let d = ev(*discr)?.as_bits()?;
                        next = Some(
                            cases
                                .iter()
                                .find(|(v, _)| *v == d)
                                .map_or(*default, |(_, b)| *b),
                        );
                        None
                    }
                    InstKind::Ret { value } => {
                        return match value {
                            Some(v) => ev(*v).map(Some),
                            None => Ok(None),
                        };
                    }
                    InstKind::Unreachable => {
                        return Err(InterpError::Unreachable {
                            function: func.name.clone(),
                            block: func.block_name(block),
                        })
                    }
                };
                if let Some(v) = result {
                    values.insert(id, v);
                }
                if next.is_some() {
                    break;
                }
            }
            let target = next.ok_or_else(|| {
                malformed(format!("block {} ends without a terminator", func.block_name(block)))
            })?;
            prev = Some(block);
            block = target;
        }
    }
}
