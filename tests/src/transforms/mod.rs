mod bogus_flow;
mod flattening;
mod opaque_predicate;
mod string_encryption;
mod substitution;

use veil_core::{interp::Interpreter, Module};

/// Inputs for the single-argument samples, including loop bounds of zero and negatives.
pub(crate) const INPUTS: [i64; 7] = [-7, -1, 0, 1, 2, 10, 31];

/// Calls every sample function on both modules and compares results and captured output.
pub(crate) fn assert_equivalent(before: &Module, after: &Module) {
    let mut original = Interpreter::new(before);
    let mut obfuscated = Interpreter::new(after);
    for name in ["compute", "compute_ssa", "classify"] {
        for x in INPUTS {
            assert_eq!(
                original.call(name, &[x]).unwrap(),
                obfuscated.call(name, &[x]).unwrap(),
                "{name}({x})"
            );
        }
    }
    for x in INPUTS {
        for y in [i64::from(i32::MIN), -3, 0, 9, i64::from(i32::MAX)] {
            assert_eq!(
                original.call("mix", &[x, y]).unwrap(),
                obfuscated.call("mix", &[x, y]).unwrap(),
                "mix({x}, {y})"
            );
        }
    }
    assert_eq!(
        original.call("main", &[]).unwrap(),
        obfuscated.call("main", &[]).unwrap()
    );
    assert_eq!(original.externals().stdout, obfuscated.externals().stdout);
}
