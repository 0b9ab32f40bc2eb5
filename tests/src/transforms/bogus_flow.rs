use crate::transforms::assert_equivalent;
use crate::{init_tracing, run_passes};
use veil_core::{interp::Interpreter, samples, verify::verify_module};
use veil_transform::config::BOGUS_CONTROL_FLOW;

#[tokio::test]
async fn test_bogus_flow_at_full_probability() {
    init_tracing();
    let (module, report) = run_passes(&[BOGUS_CONTROL_FLOW], 42);
    verify_module(&module).unwrap();

    let before = samples::compute().unwrap().block_count();
    let compute = module.function("compute").unwrap();
    assert!(compute.block_count() > before);

    let mut interp = Interpreter::new(&module);
    assert_eq!(interp.call("compute", &[10]).unwrap(), Some(90));
    let visited = interp.visited_blocks("compute");
    for &block in compute.layout() {
        if compute.block(block).unwrap().name.ends_with(".bogus") {
            assert!(!visited.contains(&block));
        }
    }

    let pass = report.function("compute").unwrap().pass(BOGUS_CONTROL_FLOW).unwrap();
    assert_eq!(pass.blocks_after - pass.blocks_before, 2 * pass.transformed);
}

#[tokio::test]
async fn test_bogus_flow_preserves_behavior_across_seeds() {
    init_tracing();
    let original = samples::sample_module().unwrap();
    for seed in [0, 1, 2, 3, 99] {
        let (module, report) = run_passes(&[BOGUS_CONTROL_FLOW], seed);
        assert!(report.is_success());
        assert_equivalent(&original, &module);
    }
}
