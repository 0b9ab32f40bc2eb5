use crate::transforms::assert_equivalent;
use crate::{init_tracing, run_passes};
use veil_analysis::metrics::collect_metrics;
use veil_core::{cfg::successors, interp::Interpreter, samples, verify::verify_module};
use veil_transform::config::OPAQUE_PREDICATE;

#[tokio::test]
async fn test_opaque_predicate_adds_blocks() {
    init_tracing();
    let before = collect_metrics(&samples::compute().unwrap()).unwrap();
    let (module, _) = run_passes(&[OPAQUE_PREDICATE], 42);
    let after = collect_metrics(module.function("compute").unwrap()).unwrap();
    assert!(
        after.block_cnt > before.block_cnt,
        "Block count should increase"
    );
    assert!(after.edge_cnt > before.edge_cnt);
}

#[tokio::test]
async fn test_dead_paths_rejoin_and_are_never_taken() {
    init_tracing();
    let original = samples::sample_module().unwrap();
    for seed in 0..6 {
        let (module, _) = run_passes(&[OPAQUE_PREDICATE], seed);
        verify_module(&module).unwrap();
        assert_equivalent(&original, &module);

        let compute = module.function("compute").unwrap();
        let dead: Vec<_> = compute
            .layout()
            .iter()
            .copied()
            .filter(|&b| compute.block(b).unwrap().name.ends_with(".opaque"))
            .collect();
        assert!(!dead.is_empty());
        for &b in &dead {
            assert_eq!(successors(compute, b).len(), 1);
        }

        let mut interp = Interpreter::new(&module);
        for x in [0, 5, 10] {
            interp.call("compute", &[x]).unwrap();
        }
        let visited = interp.visited_blocks("compute");
        assert!(dead.iter().all(|b| !visited.contains(b)));
    }
}
