mod cli;
mod commands;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use pageshot_storage::Storage;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Capture(args) => commands::capture::run(args).await,
        Commands::Schedule { command } => {
            let storage = open_storage(cli.db_path.as_deref())?;
            commands::schedule::run(storage, command)
        }
        Commands::Run(args) => {
            let storage = open_storage(cli.db_path.as_deref())?;
            commands::run::run(storage, args).await
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "debug"
    } else {
        "info,pageshot_engine=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_storage(path: Option<&Path>) -> Result<Arc<Storage>> {
    let storage = match path {
        Some(path) => Storage::new(path)?,
        None => Storage::open_default()?,
    };
    Ok(Arc::new(storage))
}
