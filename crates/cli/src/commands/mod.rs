use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use veil_core::Module;
use veil_utils::errors::ObfuscateError;

pub mod cfg;
pub mod exec;
pub mod obfuscate;
pub mod sample;
pub mod show;

#[derive(Subcommand)]
pub enum Cmd {
    /// Apply obfuscation passes to a module
    Obfuscate(obfuscate::ObfuscateArgs),

    /// Write a function's CFG as Graphviz dot
    Cfg(cfg::CfgArgs),

    /// Run a function in the interpreter
    Exec(exec::ExecArgs),

    /// Print a module or function listing
    Show(show::ShowArgs),

    /// Write the built-in sample module as JSON
    Sample(sample::SampleArgs),
}

#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Obfuscate(args) => args.execute().await,
            Cmd::Cfg(args) => args.execute().await,
            Cmd::Exec(args) => args.execute().await,
            Cmd::Show(args) => args.execute().await,
            Cmd::Sample(args) => args.execute().await,
        }
    }
}

/// Reads a JSON-serialized module.
pub async fn read_module(path: &str) -> Result<Module, ObfuscateError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Writes `text` to `path`, or to stdout without one.
pub async fn write_output(path: Option<&str>, text: &str) -> Result<(), ObfuscateError> {
    write_output_to(path, text, &mut tokio::io::stdout()).await
}

/// Writes `text` to `path`, or to `stdout` without one.
///
/// Status messages go through `tracing` (stderr), so `stdout` only ever carries the payload.
pub async fn write_output_to<W>(
    path: Option<&str>,
    text: &str,
    stdout: &mut W,
) -> Result<(), ObfuscateError>
where
    W: AsyncWrite + Unpin + Send,
{
    match path {
        Some(path) => tokio::fs::write(path, text).await?,
        None => {
            stdout.write_all(text.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

/// Looks up a defined function by name.
pub fn function<'m>(
    module: &'m Module,
    name: &str,
) -> Result<&'m veil_core::Function, ObfuscateError> {
    module
        .function(name)
        .ok_or_else(|| ObfuscateError::UnknownFunction(name.to_owned()))
}
