//! Structured change log produced by the pipeline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use veil_analysis::metrics::Metrics;

/// What one pass did to one function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_name: String,
    pub blocks_before: usize,
    pub blocks_after: usize,
    /// Instruction handles present after the pass but not before.
    pub instructions_added: usize,
    /// Instruction handles present before the pass but not after.
    pub instructions_removed: usize,
    pub modified: bool,
    pub warnings: Vec<String>,
    pub transformed: usize,
    pub skipped: usize,
    /// Potency change measured around the pass, when metrics were available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub potency_delta: Option<f64>,
}

/// Every pass report for one function, keyed by pass name in run order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionReport {
    pub function: String,
    pub passes: IndexMap<String, PassReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_before: Option<Metrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_after: Option<Metrics>,
}

impl FunctionReport {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            ..Self::default()
        }
    }

    pub fn pass(&self, name: &str) -> Option<&PassReport> {
        self.passes.get(name)
    }

    /// True when any pass changed the function.
    pub fn modified(&self) -> bool {
        self.passes.values().any(|p| p.modified)
    }
}

/// A function whose pipeline run was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFailure {
    pub function: String,
    /// The pass that failed, or `None` when the input itself was rejected.
    pub pass: Option<String>,
    pub error: String,
}

/// Totals for one pass across a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub functions_modified: usize,
    pub transformations: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleReport {
    pub functions: Vec<FunctionReport>,
    pub failures: Vec<FunctionFailure>,
}

impl ModuleReport {
    pub fn function(&self, name: &str) -> Option<&FunctionReport> {
        self.functions.iter().find(|f| f.function == name)
    }

    /// Aggregates the pass reports of every function, keyed by pass name in first-seen order.
    pub fn summary(&self) -> IndexMap<String, PassSummary> {
        let mut summary: IndexMap<String, PassSummary> = IndexMap::new();
        for report in self.functions.iter().flat_map(|f| f.passes.values()) {
            let entry = summary.entry(report.pass_name.clone()).or_default();
            if report.modified {
                entry.functions_modified += 1;
            }
            entry.transformations += report.transformed;
            entry.warnings += report.warnings.len();
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
