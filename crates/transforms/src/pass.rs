//! The pass pipeline: runs an ordered list of transforms over each function.
//!
//! Every pass works on a snapshot of the function and the module globals. The snapshot is
//! verified and only then committed, so a pass that breaks an invariant leaves no trace.
//! Earlier passes of the same run stay committed.

use crate::bogus_flow::BogusControlFlow;
use crate::config::{
    PassSettings, PipelineConfig, BOGUS_CONTROL_FLOW, DEFAULT_SEED, FLATTENING, OPAQUE_PREDICATE,
    STRING_ENCRYPTION, SUBSTITUTION,
};
use crate::flattening::Flattening;
use crate::opaque_predicate::OpaquePredicate;
use crate::report::{FunctionFailure, FunctionReport, ModuleReport, PassReport};
use crate::string_encryption::StringEncryption;
use crate::substitution::Substitution;
use crate::{PassContext, Transform};
use rand::{rngs::StdRng, SeedableRng};
use sha3::{Digest, Keccak256};
use tracing::{debug, error, info};
use veil_analysis::metrics::{collect_metrics, compare};
use veil_core::{verify::verify_function, Function, GlobalTable, Module};
use veil_utils::errors::PipelineError;

/// Builds the pass called `name` from its settings.
pub fn build_pass(name: &str, settings: &PassSettings) -> Result<Box<dyn Transform>, PipelineError> {
    if let Some(value) = settings.probability {
        if !(0.0..=1.0).contains(&value) {
            return Err(PipelineError::InvalidProbability {
                pass: name.to_owned(),
                value,
            });
        }
    }
    let pass: Box<dyn Transform> = match name {
        SUBSTITUTION => Box::new(Substitution::new(settings)),
        STRING_ENCRYPTION => Box::new(StringEncryption::new(settings)),
        OPAQUE_PREDICATE => Box::new(OpaquePredicate::new(settings)),
        BOGUS_CONTROL_FLOW => Box::new(BogusControlFlow::new(settings)),
        FLATTENING => Box::new(Flattening::new(settings)),
        other => return Err(PipelineError::UnknownPass(other.to_owned())),
    };
    Ok(pass)
}

/// Random stream for one function: Keccak-256 of the seed and the function name.
///
/// Functions draw from independent streams, so the result for one function does not depend
/// on which other functions the module holds.
pub fn function_rng(seed: u64, function: &str) -> StdRng {
    let mut hasher = Keccak256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(function.as_bytes());
    StdRng::from_seed(hasher.finalize().into())
}

/// An ordered list of passes plus the seed their random choices derive from.
pub struct Pipeline {
    passes: Vec<Box<dyn Transform>>,
    seed: u64,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("passes", &self.pass_names())
            .field("seed", &self.seed)
            .finish()
    }
}

impl Pipeline {
    /// Validates the order of `passes`.
    ///
    /// Rejects duplicates and any order that runs flattening before opaque predicates: once
    /// every edge goes through the dispatcher there are no unconditional branches left to
    /// guard.
    pub fn new(passes: Vec<Box<dyn Transform>>, seed: u64) -> Result<Self, PipelineError> {
        let names: Vec<&str> = passes.iter().map(|p| p.name()).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(PipelineError::DuplicatePass((*name).to_owned()));
            }
        }
        let position = |name: &str| names.iter().position(|n| *n == name);
        if let (Some(flatten), Some(opaque)) = (position(FLATTENING), position(OPAQUE_PREDICATE)) {
            if flatten < opaque {
                return Err(PipelineError::InvalidOrder {
                    first: OPAQUE_PREDICATE.to_owned(),
                    then: FLATTENING.to_owned(),
                });
            }
        }
        Ok(Self { passes, seed })
    }

    /// Every enabled pass of `config` in canonical order.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::from_names(&config.enabled_passes(), config)
    }

    /// The passes in `names`, in that order, configured from `config`.
    pub fn from_names(names: &[&str], config: &PipelineConfig) -> Result<Self, PipelineError> {
        let passes = names
            .iter()
            .map(|name| build_pass(name, &config.settings(name)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(passes, config.seed.unwrap_or(DEFAULT_SEED))
    }

    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub const fn seed(&self) -> u64 {
        self.seed
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass over `func`.
    ///
    /// On error the passes that already succeeded remain applied to `func` and `globals`.
    pub fn run_function(
        &self,
        func: &mut Function,
        globals: &mut GlobalTable,
    ) -> Result<FunctionReport, PipelineError> {
        let mut report = FunctionReport::new(func.name.clone());
        if func.is_declaration() {
            return Ok(report);
        }
        verify_function(func).map_err(|source| PipelineError::InvalidInput {
            function: func.name.clone(),
            source,
        })?;

        let mut rng = function_rng(self.seed, &func.name);
        report.metrics_before = collect_metrics(func).ok();
        for pass in &self.passes {
            let before = collect_metrics(func).ok();
            let live_before = func.live_inst_ids();
            let mut snapshot = func.clone();
            let mut globals_snapshot = globals.clone();

            let mut ctx = PassContext::new(&mut rng, &mut globals_snapshot);
            let modified = pass
                .apply(&mut snapshot, &mut ctx)
                .map_err(|source| PipelineError::Transform {
                    pass: pass.name().to_owned(),
                    function: func.name.clone(),
                    source,
                })?;
            let outcome = ctx.finish();

            if let Err(source) = verify_function(&snapshot) {
                info!("{:>20} {:>10} ×", pass.name(), func.name);
                return Err(PipelineError::InvariantViolation {
                    pass: pass.name().to_owned(),
                    function: func.name.clone(),
                    source,
                });
            }

            let live_after = snapshot.live_inst_ids();
            let after = collect_metrics(&snapshot).ok();
            let delta = before.as_ref().zip(after.as_ref()).map(|(b, a)| compare(b, a));
            info!(
                "{:>20} {:>10} Δ{:+.2} ✓",
                pass.name(),
                func.name,
                delta.unwrap_or_default()
            );
            debug!(
                function = %func.name,
                pass = pass.name(),
                "\n{}",
                snapshot.display(Some(&globals_snapshot))
            );

            report.passes.insert(
                pass.name().to_owned(),
                PassReport {
                    pass_name: pass.name().to_owned(),
                    blocks_before: func.block_count(),
                    blocks_after: snapshot.block_count(),
                    instructions_added: live_after.difference(&live_before).count(),
                    instructions_removed: live_before.difference(&live_after).count(),
                    modified,
                    warnings: outcome.warnings,
                    transformed: outcome.transformed,
                    skipped: outcome.skipped,
                    potency_delta: delta,
                },
            );
            *func = snapshot;
            *globals = globals_snapshot;
        }
        report.metrics_after = collect_metrics(func).ok();
        Ok(report)
    }

    /// Runs the pipeline over every defined function of `module`.
    ///
    /// A failing function is recorded and the run moves on to the next one.
    pub fn run_module(&self, module: &mut Module) -> ModuleReport {
        let mut report = ModuleReport::default();
        let Module {
            globals, functions, ..
        } = module;
        for func in functions.values_mut().filter(|f| !f.is_declaration()) {
            match self.run_function(func, globals) {
                Ok(function_report) => report.functions.push(function_report),
                Err(err) => {
                    error!(function = %func.name, "{err}");
                    let pass = match &err {
                        PipelineError::Transform { pass, .. }
                        | PipelineError::InvariantViolation { pass, .. } => Some(pass.clone()),
                        _ => None,
                    };
                    report.failures.push(FunctionFailure {
                        function: func.name.clone(),
                        pass,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PassContext;
    use veil_core::{interp::Interpreter, samples, InstKind};
    use veil_utils::errors::TransformError;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    /// Deletes the terminator of the last block: always caught by the verifier.
    struct BreakTerminator;

    impl Transform for BreakTerminator {
        fn name(&self) -> &'static str {
            "break_terminator"
        }

        fn apply(
            &self,
            func: &mut Function,
            _ctx: &mut PassContext<'_>,
        ) -> Result<bool, TransformError> {
            let Some(&last) = func.layout().last() else {
                return Ok(false);
            };
            if let Some(term) = func.terminator(last) {
                func.erase_inst(term)?;
            }
            func.push_inst(last, InstKind::Alloca { ty: veil_core::Type::I32 })?;
            Ok(true)
        }
    }

    fn pipeline(names: &[&str], seed: u64) -> Pipeline {
        let config = PipelineConfig::only(names)
            .with_probability(OPAQUE_PREDICATE, 1.0)
            .with_probability(BOGUS_CONTROL_FLOW, 1.0);
        Pipeline::from_names(names, &config).unwrap().with_seed(seed)
    }

    #[tokio::test]
    async fn test_flattening_before_opaque_is_rejected() {
        init_tracing();
        let config = PipelineConfig::default();
        let err = Pipeline::from_names(&[FLATTENING, OPAQUE_PREDICATE], &config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOrder { .. }));
        assert!(Pipeline::from_names(&[OPAQUE_PREDICATE, FLATTENING], &config).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_construction() {
        init_tracing();
        let config = PipelineConfig::default();
        assert!(matches!(
            Pipeline::from_names(&["inline_everything"], &config),
            Err(PipelineError::UnknownPass(_))
        ));
        assert!(matches!(
            Pipeline::from_names(&[SUBSTITUTION, SUBSTITUTION], &config),
            Err(PipelineError::DuplicatePass(_))
        ));
        let config = PipelineConfig::default().with_probability(BOGUS_CONTROL_FLOW, 1.5);
        assert!(matches!(
            Pipeline::from_config(&config),
            Err(PipelineError::InvalidProbability { .. })
        ));
    }

    #[tokio::test]
    async fn test_report_counts_are_exact() {
        init_tracing();
        let mut module = samples::sample_module().unwrap();
        let report = pipeline(&[SUBSTITUTION], 1).run_module(&mut module);
        let mix = report.function("mix").unwrap().pass(SUBSTITUTION).unwrap();
        // Five rewrites, each adds two instructions and removes one.
        assert_eq!(mix.transformed, 5);
        assert_eq!(mix.instructions_added, 10);
        assert_eq!(mix.instructions_removed, 5);
        assert_eq!(mix.blocks_before, mix.blocks_after);
        assert!(mix.modified);
    }

    #[tokio::test]
    async fn test_full_pipeline_preserves_behavior() {
        init_tracing();
        let original = samples::sample_module().unwrap();
        let mut module = original.clone();
        let report = pipeline(
            &[
                SUBSTITUTION,
                STRING_ENCRYPTION,
                OPAQUE_PREDICATE,
                BOGUS_CONTROL_FLOW,
                FLATTENING,
            ],
            7,
        )
        .run_module(&mut module);
        assert!(report.is_success(), "{:?}", report.failures);
        veil_core::verify::verify_module(&module).unwrap();

        let mut before = Interpreter::new(&original);
        let mut after = Interpreter::new(&module);
        for x in [-3, 0, 1, 2, 10] {
            for name in ["compute", "compute_ssa", "classify"] {
                assert_eq!(
                    before.call(name, &[x]).unwrap(),
                    after.call(name, &[x]).unwrap(),
                    "{name}({x})"
                );
            }
            assert_eq!(
                before.call("mix", &[x, 4]).unwrap(),
                after.call("mix", &[x, 4]).unwrap()
            );
        }
        assert_eq!(before.call("main", &[]).unwrap(), Some(96));
        assert_eq!(after.call("main", &[]).unwrap(), Some(96));
        assert_eq!(before.externals().stdout, after.externals().stdout);
    }

    #[tokio::test]
    async fn test_runs_are_reproducible() {
        init_tracing();
        let names = [OPAQUE_PREDICATE, BOGUS_CONTROL_FLOW, FLATTENING];
        let mut a = samples::sample_module().unwrap();
        let mut b = samples::sample_module().unwrap();
        pipeline(&names, 99).run_module(&mut a);
        pipeline(&names, 99).run_module(&mut b);
        assert_eq!(a, b);

        let mut c = samples::sample_module().unwrap();
        pipeline(&names, 100).run_module(&mut c);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_violation_discards_only_the_failing_pass() {
        init_tracing();
        let config = PipelineConfig::default();
        let passes = vec![
            build_pass(SUBSTITUTION, &config.settings(SUBSTITUTION)).unwrap(),
            Box::new(BreakTerminator) as Box<dyn Transform>,
        ];
        let pipeline = Pipeline::new(passes, 1).unwrap();

        let mut module = samples::sample_module().unwrap();
        let original_mix = module.function("mix").unwrap().clone();
        let report = pipeline.run_module(&mut module);

        assert!(report.functions.is_empty());
        let failure = report
            .failures
            .iter()
            .find(|f| f.function == "mix")
            .unwrap();
        assert_eq!(failure.pass.as_deref(), Some("break_terminator"));

        // Substitution stays committed, the broken terminator does not.
        let mix = module.function("mix").unwrap();
        veil_core::verify::verify_function(mix).unwrap();
        assert_ne!(mix, &original_mix);
        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call("mix", &[5, 11]).unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_malformed_input_is_rejected() {
        init_tracing();
        let mut func = Function::new("bad", vec![], veil_core::Type::Void);
        let entry = func.create_block("entry");
        func.push_inst(entry, InstKind::Alloca { ty: veil_core::Type::I32 })
            .unwrap();
        let mut globals = GlobalTable::default();
        let err = pipeline(&[SUBSTITUTION], 0)
            .run_function(&mut func, &mut globals)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }

    #[test]
    fn test_function_rng_depends_on_seed_and_name() {
        use rand::Rng;
        let draw = |seed, name| function_rng(seed, name).random::<u64>();
        assert_eq!(draw(1, "f"), draw(1, "f"));
        assert_ne!(draw(1, "f"), draw(1, "g"));
        assert_ne!(draw(1, "f"), draw(2, "f"));
    }
}
