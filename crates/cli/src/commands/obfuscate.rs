/// Module for the `obfuscate` subcommand, which runs the pass pipeline over a serialized
/// module.
///
/// The module is read as JSON and verified, the pipeline is built from an optional JSON
/// configuration (or an explicit `--passes` list), and the transformed module is written back
/// as JSON. The per-function, per-pass report can be emitted alongside it.
use super::{read_module, write_output_to};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use tokio::io::AsyncWrite;
use tracing::{info, warn};
use veil_core::{verify::verify_module, Module};
use veil_transform::{ModuleReport, Pipeline, PipelineConfig};
use veil_utils::errors::ObfuscateError;

/// Arguments for the `obfuscate` subcommand.
#[derive(Args)]
pub struct ObfuscateArgs {
    /// Path to the input module (JSON).
    pub input: String,
    /// Path to a JSON pass configuration.
    #[arg(short, long)]
    pub config: Option<String>,
    /// Comma-separated pass list overriding the configured selection and order.
    #[arg(long)]
    pub passes: Option<String>,
    /// Random seed (overrides the configuration's `seed`, default 42).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Where to write the transformed module (default: stdout).
    #[arg(short, long)]
    pub output: Option<String>,
    /// Path to emit the pass report as JSON.
    #[arg(long)]
    pub emit: Option<String>,
}

impl ObfuscateArgs {
    /// Builds the pipeline described by the arguments.
    pub async fn pipeline(&self) -> Result<Pipeline, ObfuscateError> {
        let config = match &self.config {
            Some(path) => PipelineConfig::from_json(&tokio::fs::read_to_string(path).await?)?,
            None => PipelineConfig::default(),
        };
        let pipeline = match &self.passes {
            Some(list) => {
                let names: Vec<&str> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect();
                if names.is_empty() {
                    return Err(ObfuscateError::InvalidArgument(
                        "--passes names no pass".into(),
                    ));
                }
                Pipeline::from_names(&names, &config)?
            }
            None => Pipeline::from_config(&config)?,
        };
        Ok(match self.seed {
            Some(seed) => pipeline.with_seed(seed),
            None => pipeline,
        })
    }

    /// Verifies `module` and runs the pipeline over it.
    pub async fn run(&self, module: &mut Module) -> Result<ModuleReport, ObfuscateError> {
        verify_module(module)?;
        let pipeline = self.pipeline().await?;
        info!(
            "Applying {} passes (seed {}): {}",
            pipeline.pass_names().len(),
            pipeline.seed(),
            pipeline.pass_names().join(", ")
        );
        Ok(pipeline.run_module(module))
    }

    /// Reads, obfuscates and writes the module, sending it to `stdout` when no `--output`
    /// path is given. Progress and the pass summary are logged, never written to `stdout`.
    pub async fn obfuscate_to<W>(&self, stdout: &mut W) -> Result<ModuleReport, ObfuscateError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut module = read_module(&self.input).await?;
        let report = self.run(&mut module).await?;

        for failure in &report.failures {
            warn!(
                function = %failure.function,
                pass = failure.pass.as_deref().unwrap_or("-"),
                "{}",
                failure.error
            );
        }
        for (pass, summary) in report.summary() {
            info!(
                "{pass:>20}: {} functions modified, {} transformations, {} warnings",
                summary.functions_modified, summary.transformations, summary.warnings
            );
        }

        if let Some(path) = &self.emit {
            tokio::fs::write(path, serde_json::to_string_pretty(&report)?).await?;
            info!("Wrote pass report to {path}");
        }
        write_output_to(
            self.output.as_deref(),
            &serde_json::to_string_pretty(&module)?,
            stdout,
        )
        .await?;

        if report.is_success() {
            info!("✅ Obfuscation complete");
        } else {
            warn!(
                "⚠️  Obfuscation finished with {} failed functions",
                report.failures.len()
            );
        }
        Ok(report)
    }
}

/// Executes the `obfuscate` subcommand.
#[async_trait]
impl super::Command for ObfuscateArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        self.obfuscate_to(&mut tokio::io::stdout()).await?;
        Ok(())
    }
}
