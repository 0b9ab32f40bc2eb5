use crate::{init_tracing, run_passes};
use veil_core::{interp::Interpreter, InstKind, Value};
use veil_transform::{config::STRING_ENCRYPTION, string_encryption::XOR_KEY};

#[tokio::test]
async fn test_secret_literal_is_encoded_in_place() {
    init_tracing();
    let (module, report) = run_passes(&[STRING_ENCRYPTION], 0);
    let secret = module.globals.id_of("secret").unwrap();
    let global = module.globals.get(secret).unwrap();
    assert_ne!(global.data, b"secret\0");
    let decoded: Vec<u8> = global.data.iter().map(|b| b ^ XOR_KEY).collect();
    assert_eq!(decoded, b"secret\0");

    // `strlen` still reads through a gep of the same global.
    let main = module.function("main").unwrap();
    let gep_base = main.placed_insts().find_map(|(_, id)| match main.inst(id).unwrap().kind {
        InstKind::Gep { base, .. } => Some(base),
        _ => None,
    });
    assert_eq!(gep_base, Some(Value::Global(secret)));

    let pass = report.function("main").unwrap().pass(STRING_ENCRYPTION).unwrap();
    assert_eq!(pass.transformed, 3);
    assert!(pass.warnings[0].contains("no decode stage"));
    assert_eq!(pass.instructions_added, 0);
    assert_eq!(pass.instructions_removed, 0);
}

#[tokio::test]
async fn test_output_is_only_readable_after_decoding() {
    init_tracing();
    let (module, _) = run_passes(&[STRING_ENCRYPTION], 0);

    let mut decoded = Interpreter::new(&module);
    assert_eq!(decoded.call("main", &[]).unwrap(), Some(96));
    assert_eq!(decoded.externals().stdout, "veil sample\nresult: 90\n");

    // Without decoding, the encoded literal has no terminator and `strlen` may run off the end.
    let mut raw = Interpreter::new(&module).with_raw_globals();
    let _ = raw.call("main", &[]);
    assert!(!raw.externals().stdout.contains("veil sample"));
}
