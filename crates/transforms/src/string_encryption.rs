use crate::config::{PassSettings, STRING_ENCRYPTION};
use crate::{PassContext, Transform};
use tracing::debug;
use veil_core::{Function, GlobalId, InstKind, Value};
use veil_utils::errors::TransformError;

/// Key every encoded byte is XORed with.
pub const XOR_KEY: u8 = 0x42;

/// C library functions whose pointer arguments are read as strings.
pub const STRING_CONSUMERS: [&str; 5] = ["printf", "puts", "strlen", "strcpy", "strcmp"];

/// XOR-encodes string literals passed to known string consumers.
///
/// The global's bytes are rewritten in place and `xor_key` is set, so the call site keeps
/// referencing the same global. No decode code is emitted: the output is only runnable by
/// something that decodes `xor_key` globals before use. A global that already carries a key
/// is left alone, so a literal shared between call sites or functions is encoded once.
#[derive(Debug, Default)]
pub struct StringEncryption;

impl StringEncryption {
    pub const fn new(_settings: &PassSettings) -> Self {
        Self
    }
}

/// Follows `gep` chains from `value` back to a global.
fn resolve_global(func: &Function, value: Value) -> Option<GlobalId> {
    match value {
        Value::Global(id) => Some(id),
        Value::Inst(id) => match func.inst(id).ok()?.kind {
            InstKind::Gep { base, .. } => resolve_global(func, base),
            _ => None,
        },
        Value::Param(_) | Value::Const { .. } => None,
    }
}

/// Globals referenced by string-consumer calls, in first-use order.
fn referenced_literals(func: &Function) -> Vec<GlobalId> {
    let mut found = Vec::new();
    for (_, id) in func.placed_insts() {
        let Ok(data) = func.inst(id) else { continue };
        let InstKind::Call { callee, args, .. } = &data.kind else {
            continue;
        };
        if !STRING_CONSUMERS.contains(&callee.as_str()) {
            continue;
        }
        for &arg in args {
            if let Some(global) = resolve_global(func, arg) {
                if !found.contains(&global) {
                    found.push(global);
                }
            }
        }
    }
    found
}

impl Transform for StringEncryption {
    fn name(&self) -> &'static str {
        STRING_ENCRYPTION
    }

    fn apply(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let mut encoded = Vec::new();
        for id in referenced_literals(func) {
            let Some(global) = ctx.globals.get_mut(id) else {
                return Err(TransformError::Invariant(format!("unknown global {id}")));
            };
            if global.xor_key.is_some() {
                continue;
            }
            if !global.constant || !global.initialized {
                ctx.record_skipped(1);
                continue;
            }
            global.data.iter_mut().for_each(|b| *b ^= XOR_KEY);
            global.xor_key = Some(XOR_KEY);
            debug!(
                function = %func.name,
                global = %id,
                encoded = %hex::encode(&global.data),
                "encoded literal"
            );
            encoded.push(id);
        }

        if encoded.is_empty() {
            return Ok(false);
        }
        let names: Vec<&str> = encoded
            .iter()
            .filter_map(|&id| ctx.globals.name_of(id))
            .collect();
        let message = format!(
            "{}: {} encoded with key {XOR_KEY:#04x}; no decode stage was inserted",
            func.name,
            names.join(", ")
        );
        ctx.warn(message);
        ctx.record_transformed(encoded.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use veil_core::{samples, FunctionBuilder, Global, GlobalTable, Module, Type};

    fn encrypt(func: &mut Function, globals: &mut GlobalTable) -> crate::PassOutcome {
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = PassContext::new(&mut rng, globals);
        StringEncryption.apply(func, &mut ctx).unwrap();
        ctx.finish()
    }

    fn call_args(func: &Function, callee: &str) -> Vec<Value> {
        func.placed_insts()
            .find_map(|(_, id)| match &func.inst(id).unwrap().kind {
                InstKind::Call { callee: c, args, .. } if c == callee => Some(args.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_secret_is_xored_in_place() {
        let mut module = samples::sample_module().unwrap();
        let secret = module.globals.id_of("secret").unwrap();
        let mut main = module.functions.shift_remove("main").unwrap();
        let before_args = call_args(&main, "strlen");

        let outcome = encrypt(&mut main, &mut module.globals);
        assert_eq!(outcome.transformed, 3);
        assert_eq!(outcome.warnings.len(), 1);

        let global = module.globals.get(secret).unwrap();
        let expected: Vec<u8> = b"secret\0".iter().map(|b| b ^ XOR_KEY).collect();
        assert_eq!(global.data, expected);
        assert_ne!(&global.data[..6], b"secret");
        assert_eq!(global.xor_key, Some(XOR_KEY));
        assert_eq!(global.plaintext(), b"secret\0");
        // The call still goes through the same global.
        assert_eq!(call_args(&main, "strlen"), before_args);
        assert_eq!(resolve_global(&main, before_args[0]), Some(secret));
    }

    #[test]
    fn test_shared_literal_is_encoded_once() {
        let mut module = samples::sample_module().unwrap();
        let mut first = module.functions.shift_remove("main").unwrap();
        let mut second = first.clone();
        encrypt(&mut first, &mut module.globals);
        let outcome = encrypt(&mut second, &mut module.globals);
        assert_eq!(outcome.transformed, 0);
        assert!(outcome.warnings.is_empty());
        let banner = module.globals.id_of("banner").unwrap();
        assert_eq!(module.globals.get(banner).unwrap().plaintext(), b"veil sample\0");
    }

    #[test]
    fn test_mutable_and_unknown_callees_are_left_alone() {
        let mut module = Module::new("m");
        let buffer = module
            .globals
            .insert(
                "buffer",
                Global {
                    constant: false,
                    ..Global::c_string("scratch")
                },
            )
            .unwrap();
        let tag = module.globals.insert("tag", Global::c_string("tag")).unwrap();

        let mut f = Function::new("f", vec![], Type::I32);
        let mut b = FunctionBuilder::new(&mut f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        b.call("puts", vec![Value::Global(buffer)], Type::I32).unwrap();
        b.call("log_tag", vec![Value::Global(tag)], Type::I32).unwrap();
        b.ret(Some(Value::i32(0))).unwrap();

        let outcome = encrypt(&mut f, &mut module.globals);
        assert_eq!(outcome.transformed, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(module.globals.get(buffer).unwrap().data, b"scratch\0");
        assert_eq!(module.globals.get(tag).unwrap().data, b"tag\0");
    }
}
