pub mod bogus_flow;
pub mod config;
pub mod flattening;
pub mod opaque_predicate;
pub mod pass;
pub mod predicate;
pub mod report;
pub mod string_encryption;
pub mod substitution;

pub use config::{PassSettings, PipelineConfig};
pub use pass::Pipeline;
pub use report::{FunctionFailure, FunctionReport, ModuleReport, PassReport, PassSummary};

use rand::rngs::StdRng;
use tracing::warn;
use veil_core::{Function, GlobalTable};
use veil_utils::errors::TransformError;

/// Trait for IR obfuscation passes.
pub trait Transform: Send + Sync {
    /// Returns the pass name used in configuration, logs and reports.
    fn name(&self) -> &'static str;
    /// Applies the pass to one function, returning whether anything changed.
    fn apply(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, TransformError>;
}

/// Per-run state handed to a pass: the function's random stream, the module globals, and
/// counters that end up in the pass report.
#[derive(Debug)]
pub struct PassContext<'a> {
    pub rng: &'a mut StdRng,
    pub globals: &'a mut GlobalTable,
    warnings: Vec<String>,
    transformed: usize,
    skipped: usize,
}

/// Counters collected by a [`PassContext`] once the pass returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub warnings: Vec<String>,
    pub transformed: usize,
    pub skipped: usize,
}

impl<'a> PassContext<'a> {
    pub fn new(rng: &'a mut StdRng, globals: &'a mut GlobalTable) -> Self {
        Self {
            rng,
            globals,
            warnings: Vec::new(),
            transformed: 0,
            skipped: 0,
        }
    }

    /// Records a partial-transformation warning for the report.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    pub fn record_transformed(&mut self, count: usize) {
        self.transformed += count;
    }

    /// Counts units that failed a structural precondition.
    pub fn record_skipped(&mut self, count: usize) {
        self.skipped += count;
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn finish(self) -> PassOutcome {
        PassOutcome {
            warnings: self.warnings,
            transformed: self.transformed,
            skipped: self.skipped,
        }
    }
}
