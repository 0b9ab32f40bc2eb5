use crate::transforms::assert_equivalent;
use crate::{init_tracing, run_passes};
use veil_core::{samples, verify::verify_module, Function, FunctionBuilder, Module, Type, Value};
use veil_transform::config::{
    BOGUS_CONTROL_FLOW, FLATTENING, OPAQUE_PREDICATE, PASS_ORDER, STRING_ENCRYPTION, SUBSTITUTION,
};
use veil_transform::{Pipeline, PipelineConfig};
use veil_utils::errors::PipelineError;

#[tokio::test]
async fn test_every_pass_in_order_preserves_behavior() {
    init_tracing();
    let original = samples::sample_module().unwrap();
    for seed in [0, 7, 42, 1234] {
        let (module, report) = run_passes(&PASS_ORDER, seed);
        assert!(report.is_success(), "seed {seed}: {:?}", report.failures);
        verify_module(&module).unwrap();
        assert_equivalent(&original, &module);

        let order: Vec<&str> = report
            .function("compute")
            .unwrap()
            .passes
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(order, PASS_ORDER);
    }
}

#[tokio::test]
async fn test_same_seed_same_output() {
    init_tracing();
    let (a, report_a) = run_passes(&PASS_ORDER, 9);
    let (b, report_b) = run_passes(&PASS_ORDER, 9);
    assert_eq!(a, b);
    assert_eq!(report_a, report_b);

    let (c, _) = run_passes(&PASS_ORDER, 10);
    assert_ne!(a.function("compute"), c.function("compute"));
}

#[tokio::test]
async fn test_config_file_drives_selection() {
    init_tracing();
    let config = PipelineConfig::from_json(
        r#"{
            "seed": 3,
            "substitution": {"enabled": false},
            "opaque_predicate": {"probability": 1.0, "min_block_size": 1},
            "bogus_control_flow": {"enabled": false},
            "telemetry": {"endpoint": "nowhere"}
        }"#,
    )
    .unwrap();
    assert_eq!(config.enabled_passes(), vec![OPAQUE_PREDICATE, FLATTENING]);

    let pipeline = Pipeline::from_config(&config).unwrap();
    assert_eq!(pipeline.seed(), 3);
    let mut module = samples::sample_module().unwrap();
    let report = pipeline.run_module(&mut module);
    assert!(report.is_success());

    let summary = report.summary();
    assert!(!summary.contains_key(SUBSTITUTION));
    assert!(!summary.contains_key(STRING_ENCRYPTION));
    assert!(summary[OPAQUE_PREDICATE].transformations > 0);
    assert_eq!(summary[FLATTENING].functions_modified, 3);
    assert_equivalent(&samples::sample_module().unwrap(), &module);
}

#[tokio::test]
async fn test_flattening_cannot_precede_opaque_predicates() {
    let config = PipelineConfig::default();
    assert!(matches!(
        Pipeline::from_names(&[FLATTENING, OPAQUE_PREDICATE], &config),
        Err(PipelineError::InvalidOrder { .. })
    ));
    assert!(matches!(
        Pipeline::from_names(&[SUBSTITUTION, "virtualize"], &config),
        Err(PipelineError::UnknownPass(name)) if name == "virtualize"
    ));
    let bad = PipelineConfig::default().with_probability(BOGUS_CONTROL_FLOW, 1.5);
    assert!(matches!(
        Pipeline::from_config(&bad),
        Err(PipelineError::InvalidProbability { .. })
    ));
}

#[tokio::test]
async fn test_malformed_function_does_not_stop_the_module() {
    init_tracing();
    let mut module = samples::sample_module().unwrap();
    // A block without a terminator.
    let mut broken = Function::new("broken", vec![Type::I32], Type::I32);
    let mut b = FunctionBuilder::new(&mut broken);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    b.add(Value::Param(0), Value::i32(1)).unwrap();
    module.add_function(broken.clone()).unwrap();

    let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();
    let report = pipeline.run_module(&mut module);
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].function, "broken");
    assert_eq!(report.failures[0].pass, None);
    assert_eq!(module.function("broken"), Some(&broken));
    assert!(report.function("compute").unwrap().modified());
}

#[tokio::test]
async fn test_declarations_are_skipped() {
    let mut module = Module::new("decls");
    module
        .add_function(Function::new("puts", vec![Type::Ptr], Type::I32))
        .unwrap();
    let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();
    let report = pipeline.run_module(&mut module);
    assert!(report.functions.is_empty());
    assert!(report.is_success());
}
