use super::write_output;
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use veil_core::samples::sample_module;

/// Arguments for the `sample` subcommand.
#[derive(Args)]
pub struct SampleArgs {
    /// Where to write the module (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,
}

#[async_trait]
impl super::Command for SampleArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let module = sample_module()?;
        write_output(
            self.output.as_deref(),
            &serde_json::to_string_pretty(&module)?,
        )
        .await?;
        Ok(())
    }
}
