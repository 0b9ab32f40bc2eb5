//! LLVM-flavoured text listing of functions and modules, for logs and the `show` command.

use super::{Function, GlobalTable, InstData, InstKind, Module, Value};
use std::fmt;

/// Borrowed printer for a function, optionally resolving global names.
#[derive(Debug)]
pub struct FunctionDisplay<'a> {
    func: &'a Function,
    globals: Option<&'a GlobalTable>,
}

impl Function {
    /// Returns a printer; pass the module's globals to print them by name.
    pub const fn display<'a>(&'a self, globals: Option<&'a GlobalTable>) -> FunctionDisplay<'a> {
        FunctionDisplay {
            func: self,
            globals,
        }
    }
}

impl FunctionDisplay<'_> {
    fn value(&self, v: Value) -> String {
        match v {
            Value::Inst(id) => id.to_string(),
            Value::Param(i) => format!("%arg{i}"),
            Value::Const { ty, bits } => ty.sign_extend(bits).to_string(),
            Value::Global(id) => match self.globals.and_then(|g| g.name_of(id)) {
                Some(name) => format!("@{name}"),
                None => id.to_string(),
            },
        }
    }

    fn typed(&self, v: Value) -> String {
        match self.func.value_type(v) {
            Some(ty) => format!("{ty} {}", self.value(v)),
            None => format!("? {}", self.value(v)),
        }
    }

    fn label(&self, b: super::BlockId) -> String {
        format!("%{}", self.func.block_name(b))
    }

    fn inst(&self, data: &InstData) -> String {
        match &data.kind {
            InstKind::Binary { op, lhs, rhs } => {
                format!("{op} {} {}, {}", data.ty, self.value(*lhs), self.value(*rhs))
            }
            InstKind::Icmp { pred, lhs, rhs } => {
                format!("icmp {pred} {}, {}", self.typed(*lhs), self.value(*rhs))
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => format!(
                "select {}, {}, {}",
                self.typed(*cond),
                self.typed(*on_true),
                self.typed(*on_false)
            ),
            InstKind::Alloca { ty } => format!("alloca {ty}"),
            InstKind::Load { ty, ptr } => format!("load {ty}, ptr {}", self.value(*ptr)),
            InstKind::Store { value, ptr } => {
                format!("store {}, ptr {}", self.typed(*value), self.value(*ptr))
            }
            InstKind::Gep { base, offset } => {
                format!("gep ptr {}, {}", self.value(*base), self.typed(*offset))
            }
            InstKind::Phi { ty, incoming } => {
                let pairs: Vec<String> = incoming
                    .iter()
                    .map(|(b, v)| format!("[ {}, {} ]", self.value(*v), self.label(*b)))
                    .collect();
                format!("phi {ty} {}", pairs.join(", "))
            }
            InstKind::Call { callee, args, ret } => {
                let args: Vec<String> = args.iter().map(|a| self.typed(*a)).collect();
                format!("call {ret} @{callee}({})", args.join(", "))
            }
            InstKind::LandingPad => "landingpad".to_owned(),
            InstKind::Br { target } => format!("br label {}", self.label(*target)),
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            } => format!(
                "br {}, label {}, label {}",
                self.typed(*cond),
                self.label(*then_dest),
                self.label(*else_dest)
            ),
            InstKind::Switch {
                discr,
                default,
                cases,
            } => {
                let arms: Vec<String> = cases
                    .iter()
                    .map(|(v, b)| format!("    {v}, label {}", self.label(*b)))
                    .collect();
                format!(
                    "switch {}, label {} [\n{}\n  ]",
                    self.typed(*discr),
                    self.label(*default),
                    arms.join("\n")
                )
            }
            InstKind::Ret { value: Some(v) } => format!("ret {}", self.typed(*v)),
            InstKind::Ret { value: None } => "ret void".to_owned(),
            InstKind::Unreachable => "unreachable".to_owned(),
        }
    }
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.func;
        let params: Vec<String> = func
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{ty} %arg{i}"))
            .collect();
        let keyword = if func.is_declaration() { "declare" } else { "define" };
        write!(f, "{keyword} {} @{}({})", func.ret, func.name, params.join(", "))?;
        if func.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for &b in func.layout() {
            writeln!(f, "{}:", func.block_name(b))?;
            let Ok(block) = func.block(b) else { continue };
            for &id in block.insts() {
                match func.inst(id) {
                    Ok(data) if data.has_value() => writeln!(f, "  {id} = {}", self.inst(data))?,
                    Ok(data) => writeln!(f, "  {}", self.inst(data))?,
                    Err(_) => writeln!(f, "  <erased {id}>")?,
                }
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for (_, name, global) in self.globals.iter() {
            let kind = if global.constant { "constant" } else { "global" };
            write!(
                f,
                "@{name} = {kind} [{} x i8] x\"{}\"",
                global.data.len(),
                hex::encode(&global.data)
            )?;
            match global.xor_key {
                Some(key) => writeln!(f, " ; xor {key:#04x}")?,
                None => writeln!(f)?,
            }
        }
        for func in self.functions.values() {
            writeln!(f)?;
            write!(f, "{}", func.display(Some(&self.globals)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinaryOp, FunctionBuilder, Global, Module, Type, Value};
    use crate::Function;

    #[test]
    fn test_listing_names_blocks_and_globals() {
        let mut module = Module::new("m");
        let s = module.globals.insert("msg", Global::c_string("hi")).unwrap();
        let mut f = Function::new("f", vec![Type::I32], Type::I32);
        let mut b = FunctionBuilder::new(&mut f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        b.call("puts", vec![Value::Global(s)], Type::I32).unwrap();
        let x = b.binary(BinaryOp::Xor, Value::Param(0), Value::i32(-1)).unwrap();
        b.ret(Some(x)).unwrap();
        module.add_function(f).unwrap();

        let text = module.to_string();
        assert!(text.contains("@msg = constant [3 x i8] x\"686900\""));
        assert!(text.contains("define i32 @f(i32 %arg0) {"));
        assert!(text.contains("entry#0:"));
        assert!(text.contains("call i32 @puts(ptr @msg)"));
        assert!(text.contains("xor i32 %arg0, -1"));
        assert!(text.contains("ret i32 %1"));
    }
}
