use crate::{init_tracing, run_passes};
use veil_analysis::metrics::collect_metrics;
use veil_core::{
    cfg::demote_to_stack, interp::Interpreter, samples, verify::verify_function,
    verify::verify_module, Module,
};
use veil_transform::config::PASS_ORDER;
use veil_transform::string_encryption::XOR_KEY;

#[tokio::test]
async fn test_obfuscated_module_survives_json() {
    init_tracing();
    let (module, _) = run_passes(&PASS_ORDER, 11);
    let text = serde_json::to_string(&module).unwrap();
    let reloaded: Module = serde_json::from_str(&text).unwrap();
    assert_eq!(reloaded, module);
    verify_module(&reloaded).unwrap();

    let secret = reloaded.globals.id_of("secret").unwrap();
    assert_eq!(reloaded.globals.get(secret).unwrap().xor_key, Some(XOR_KEY));

    let mut interp = Interpreter::new(&reloaded);
    assert_eq!(interp.call("main", &[]).unwrap(), Some(96));
}

#[tokio::test]
async fn test_demotion_keeps_phi_loop_behavior() {
    init_tracing();
    let module = samples::sample_module().unwrap();
    let mut demoted = module.clone();
    let func = demoted.function_mut("compute_ssa").unwrap();
    let stats = demote_to_stack(func).unwrap();
    assert_eq!(stats.phis, 2);
    verify_function(func).unwrap();

    let mut before = Interpreter::new(&module);
    let mut after = Interpreter::new(&demoted);
    for x in [0, 1, 7, 10] {
        assert_eq!(
            before.call("compute_ssa", &[x]).unwrap(),
            after.call("compute_ssa", &[x]).unwrap()
        );
    }
}

#[tokio::test]
async fn test_full_pipeline_raises_potency() {
    init_tracing();
    let original = samples::compute().unwrap();
    let (module, report) = run_passes(&PASS_ORDER, 42);
    let before = collect_metrics(&original).unwrap();
    let after = collect_metrics(module.function("compute").unwrap()).unwrap();
    assert!(after.block_cnt > before.block_cnt);
    assert!(after.potency > before.potency);

    let compute = report.function("compute").unwrap();
    assert!(compute.modified());
    assert_eq!(compute.passes.len(), PASS_ORDER.len());
}
