use crate::transforms::assert_equivalent;
use crate::{init_tracing, run_passes};
use veil_core::{interp::Interpreter, samples, verify::verify_module, InstKind, Module};
use veil_transform::{config::FLATTENING, flattening::DISPATCH_BLOCK};

#[tokio::test]
async fn test_flattening_preserves_every_sample() {
    init_tracing();
    let original = samples::sample_module().unwrap();
    let (module, report) = run_passes(&[FLATTENING], 42);
    assert!(report.is_success(), "{:?}", report.failures);
    verify_module(&module).unwrap();
    assert_equivalent(&original, &module);
}

#[tokio::test]
async fn test_compute_returns_90_after_flattening() {
    init_tracing();
    let (module, report) = run_passes(&[FLATTENING], 1);
    let mut interp = Interpreter::new(&module);
    assert_eq!(interp.call("compute", &[10]).unwrap(), Some(90));

    let pass = report.function("compute").unwrap().pass(FLATTENING).unwrap();
    assert!(pass.modified);
    // Dispatcher and trap block.
    assert_eq!(pass.blocks_after, pass.blocks_before + 2);
    // entry, cond, body and latch are routed through the dispatcher.
    assert_eq!(pass.transformed, 4);
}

#[tokio::test]
async fn test_dispatcher_runs_between_original_blocks() {
    init_tracing();
    let (module, _) = run_passes(&[FLATTENING], 1);
    let compute = module.function("compute").unwrap();
    let dispatch = *compute
        .layout()
        .iter()
        .find(|&&b| compute.block(b).unwrap().name == DISPATCH_BLOCK)
        .unwrap();

    // Every original block other than the returning exit now ends in `br dispatch`.
    for &block in &compute.layout()[..4] {
        let term = compute.terminator(block).unwrap();
        assert_eq!(
            compute.inst(term).unwrap().kind,
            InstKind::Br { target: dispatch }
        );
    }

    let mut interp = Interpreter::new(&module);
    interp.call("compute", &[3]).unwrap();
    assert!(interp.visited_blocks("compute").contains(&dispatch));
}

#[tokio::test]
async fn test_switch_functions_report_a_partial_transformation() {
    init_tracing();
    let (module, report) = run_passes(&[FLATTENING], 1);
    let classify = report.function("classify").unwrap().pass(FLATTENING).unwrap();
    assert_eq!(classify.warnings.len(), 1);
    assert!(classify.warnings[0].contains("switch"));
    assert_eq!(report.summary()[FLATTENING].warnings, 1);

    let mut interp = Interpreter::new(&module);
    assert_eq!(interp.call("classify", &[1]).unwrap(), Some(20));
}

#[tokio::test]
async fn test_single_block_functions_are_untouched() {
    init_tracing();
    let (module, report) = run_passes(&[FLATTENING], 1);
    let mix = report.function("mix").unwrap().pass(FLATTENING).unwrap();
    assert!(!mix.modified);
    assert_eq!(mix.instructions_added, 0);
    assert_eq!(module.function("mix"), Some(&samples::mix().unwrap()));
}

/// Every trip through the dispatcher replaces exactly one direct jump of the original run.
fn assert_dispatch_bound(original: &Module, flattened: &Module, name: &str, x: i64) {
    let before = original.function(name).unwrap();
    let after = flattened.function(name).unwrap();

    let mut reference = Interpreter::new(original);
    let want = reference.call(name, &[x]).unwrap();
    let original_visits = reference.block_visits(name);
    let handoffs: usize = before
        .layout()
        .iter()
        .filter(|&&b| {
            let term = before.terminator(b).unwrap();
            !matches!(
                before.inst(term).unwrap().kind,
                InstKind::Ret { .. } | InstKind::Unreachable
            )
        })
        .map(|b| original_visits.get(b).copied().unwrap_or_default())
        .sum();

    let mut interp = Interpreter::new(flattened);
    assert_eq!(interp.call(name, &[x]).unwrap(), want);
    let visits = interp.block_visits(name);
    let dispatch = *after
        .layout()
        .iter()
        .find(|&&b| after.block(b).unwrap().name == DISPATCH_BLOCK)
        .unwrap();
    assert_eq!(visits[&dispatch], handoffs, "{name}({x})");
    for &block in before.layout() {
        assert_eq!(
            visits.get(&block),
            original_visits.get(&block),
            "{name}({x}) block {}",
            before.block_name(block)
        );
    }
}

#[tokio::test]
async fn test_dispatcher_entries_match_original_block_count() {
    init_tracing();
    let original = samples::sample_module().unwrap();
    let (flattened, _) = run_passes(&[FLATTENING], 5);
    for x in [0, 1, 10] {
        assert_dispatch_bound(&original, &flattened, "compute", x);
        assert_dispatch_bound(&original, &flattened, "compute_ssa", x);
    }
}
