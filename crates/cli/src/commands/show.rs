use super::{function, read_module};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use veil_analysis::metrics::collect_metrics;

/// Arguments for the `show` subcommand.
#[derive(Args)]
pub struct ShowArgs {
    /// Path to the input module (JSON)
    pub input: String,
    /// Print only this function
    #[arg(short, long)]
    pub function: Option<String>,
    /// Append CFG metrics for each printed function
    #[arg(long)]
    pub metrics: bool,
}

#[async_trait]
impl super::Command for ShowArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let module = read_module(&self.input).await?;
        let funcs = match &self.function {
            Some(name) => vec![function(&module, name)?],
            None => {
                println!("{module}");
                if !self.metrics {
                    return Ok(());
                }
                module.functions.values().collect()
            }
        };

        for func in funcs {
            if self.function.is_some() {
                println!("{}", func.display(Some(&module.globals)));
            }
            if self.metrics && !func.is_declaration() {
                let metrics = collect_metrics(func)?;
                println!("; {} {}", func.name, serde_json::to_string(&metrics)?);
            }
        }
        Ok(())
    }
}
