/// Entry point for the Veil CLI, an IR obfuscation tool.
///
/// Parses command-line arguments, initializes logging and dispatches to the subcommands for
/// obfuscating a serialized module, rendering CFGs, running functions in the interpreter,
/// listing IR and emitting the sample module.
use clap::Parser;
use tracing_subscriber::EnvFilter;
use veil_cli::commands::{Cmd, Command};

/// Command-line interface for Veil.
///
/// Veil reads a module as JSON, applies semantics-preserving obfuscation passes
/// (substitution, string encryption, opaque predicates, bogus control flow, flattening) and
/// writes the module and a per-pass report back as JSON.
#[derive(Parser)]
#[command(name = "veil")]
#[command(about = "Veil: IR obfuscation passes")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Runs the Veil CLI with the provided arguments.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli.command.execute().await
}
