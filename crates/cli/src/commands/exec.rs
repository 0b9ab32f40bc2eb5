use super::{function, read_module};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use veil_core::interp::Interpreter;

/// Arguments for the `exec` subcommand.
#[derive(Args)]
pub struct ExecArgs {
    /// Path to the input module (JSON)
    pub input: String,
    /// Function to call
    #[arg(short, long, default_value = "main")]
    pub function: String,
    /// Read XOR-encoded globals as stored instead of decoding them first
    #[arg(long)]
    pub raw_globals: bool,
    /// Integer arguments
    #[arg(allow_negative_numbers = true)]
    pub args: Vec<i64>,
}

#[async_trait]
impl super::Command for ExecArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let module = read_module(&self.input).await?;
        function(&module, &self.function)?;

        let mut interp = Interpreter::new(&module);
        if self.raw_globals {
            interp = interp.with_raw_globals();
        }
        let result = interp.call(&self.function, &self.args)?;

        print!("{}", interp.externals().stdout);
        match result {
            Some(value) => println!("{} returned {value}", self.function),
            None => println!("{} returned", self.function),
        }
        println!("{} steps", interp.steps());
        Ok(())
    }
}
