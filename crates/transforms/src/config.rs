//! Pass configuration: `{pass_name: {enabled, probability?, min_block_size?}}` plus an
//! optional top-level `seed`.
//!
//! Parsing is lenient. Unknown top-level keys and unknown per-pass keys are ignored (the
//! former with a warning), and anything left out falls back to the pass's own default.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub const SUBSTITUTION: &str = "substitution";
pub const STRING_ENCRYPTION: &str = "string_encryption";
pub const OPAQUE_PREDICATE: &str = "opaque_predicate";
pub const BOGUS_CONTROL_FLOW: &str = "bogus_control_flow";
pub const FLATTENING: &str = "flattening";

/// Every pass, in the order a configuration-built pipeline runs them.
pub const PASS_ORDER: [&str; 5] = [
    SUBSTITUTION,
    STRING_ENCRYPTION,
    OPAQUE_PREDICATE,
    BOGUS_CONTROL_FLOW,
    FLATTENING,
];

/// Seed used when neither the configuration nor the caller supplies one.
pub const DEFAULT_SEED: u64 = 42;

/// Settings for one pass. `None` means "use the pass default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_block_size: Option<usize>,
}

/// Whether a pass runs when the configuration does not say.
///
/// String encryption is off unless asked for: it leaves a decode obligation behind.
pub fn enabled_by_default(pass: &str) -> bool {
    pass != STRING_ENCRYPTION
}

/// Parsed pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct PipelineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(flatten)]
    pub passes: IndexMap<String, PassSettings>,
}

impl TryFrom<Map<String, Value>> for PipelineConfig {
    type Error = serde_json::Error;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut config = Self::default();
        for (key, value) in map {
            if key == "seed" {
                config.seed = serde_json::from_value(value)?;
            } else if PASS_ORDER.contains(&key.as_str()) {
                let settings: PassSettings = serde_json::from_value(value)?;
                config.passes.insert(key, settings);
            } else {
                warn!(key = %key, "ignoring unknown configuration key");
            }
        }
        Ok(config)
    }
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Settings for `pass`, empty when the configuration does not mention it.
    pub fn settings(&self, pass: &str) -> PassSettings {
        self.passes.get(pass).cloned().unwrap_or_default()
    }

    pub fn is_enabled(&self, pass: &str) -> bool {
        self.settings(pass)
            .enabled
            .unwrap_or_else(|| enabled_by_default(pass))
    }

    /// Names of the enabled passes in pipeline order.
    pub fn enabled_passes(&self) -> Vec<&'static str> {
        PASS_ORDER
            .into_iter()
            .filter(|name| self.is_enabled(name))
            .collect()
    }

    /// Configuration enabling exactly `passes`.
    pub fn only(passes: &[&str]) -> Self {
        let mut config = Self::default();
        for name in PASS_ORDER {
            config.passes.insert(
                name.to_owned(),
                PassSettings {
                    enabled: Some(passes.contains(&name)),
                    ..PassSettings::default()
                },
            );
        }
        config
    }

    /// Overrides the probability of one pass, keeping its other settings.
    pub fn with_probability(mut self, pass: &str, probability: f64) -> Self {
        self.passes.entry(pass.to_owned()).or_default().probability = Some(probability);
        self
    }
}
