use crate::transforms::assert_equivalent;
use crate::{init_tracing, run_passes};
use rand::{rngs::StdRng, Rng, SeedableRng};
use veil_core::{interp::Interpreter, samples, InstKind};
use veil_transform::config::SUBSTITUTION;

#[tokio::test]
async fn test_substitution_preserves_every_sample() {
    init_tracing();
    let (module, report) = run_passes(&[SUBSTITUTION], 3);
    assert!(report.is_success());
    assert_equivalent(&samples::sample_module().unwrap(), &module);

    for pass in report.functions.iter().filter_map(|f| f.pass(SUBSTITUTION)) {
        assert_eq!(pass.blocks_before, pass.blocks_after);
    }
    assert_eq!(report.summary()[SUBSTITUTION].transformations, 5 + 2 + 2 + 1);
}

#[tokio::test]
async fn test_mix_matches_on_random_inputs() {
    init_tracing();
    let original = samples::sample_module().unwrap();
    let (module, _) = run_passes(&[SUBSTITUTION], 3);
    let mix = module.function("mix").unwrap();
    assert!(mix
        .placed_insts()
        .all(|(_, id)| !matches!(mix.inst(id).unwrap().kind, InstKind::Binary { op: veil_core::BinaryOp::Mul, .. })));

    let mut rng = StdRng::seed_from_u64(17);
    let mut before = Interpreter::new(&original);
    let mut after = Interpreter::new(&module);
    for _ in 0..200 {
        let x = i64::from(rng.random::<i32>());
        let y = i64::from(rng.random::<i32>());
        assert_eq!(
            before.call("mix", &[x, y]).unwrap(),
            after.call("mix", &[x, y]).unwrap(),
            "mix({x}, {y})"
        );
    }
}
