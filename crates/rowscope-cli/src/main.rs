use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::explain::ExplainArgs;

#[derive(Parser, Debug)]
#[command(name = "rowscope", version, about = "Rowscope CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how a query would be scoped for a given caller, without a database.
    Explain(ExplainArgs),

    /// Lint a scope configuration file.
    Check {
        /// Path to the scope configuration
        #[arg(long, default_value = "scope.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Explain(args) => commands::explain::run(args).await?,
        Command::Check { config } => commands::check::run(&config)?,
    }

    Ok(())
}
