mod cli;
mod commands;
mod config;
mod error;
mod utils;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
    utils::parse_size,
};
use clap::Parser;
use std::process;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    if let Commands::Config { show, reset } = &args.command {
        return config_command(&args, *show, *reset);
    }

    let config = resolve_config(&args)?;
    debug!(?config, "Effective configuration");

    let executor = CommandExecutor::new(config)?;
    let result = match args.command {
        Commands::Fetch {
            url,
            output,
            reload,
        } => executor.fetch(&url, output.as_deref(), reload).await,
        Commands::List { json } => executor.list(json),
        Commands::Show { url } => executor.show(&url),
        Commands::Checkpoint => executor.checkpoint(),
        Commands::Erase => executor.erase(),
        Commands::Prune => executor.prune(),
        Commands::Stats { json } => executor.stats(json),
        Commands::Config { .. } => Ok(()),
    };

    let finished = executor.finish();
    result.and(finished)
}

/// Load the config file and overlay command-line flags.
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref())?;

    if let Some(dir) = &args.dir {
        config.cache.directory = std::path::absolute(dir)?;
    }
    if let Some(size) = &args.max_size {
        config.cache.max_size = parse_size(size)?;
    }
    if let Some(mode) = args.freshness {
        config.cache.freshness = mode;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }

    Ok(config)
}

fn config_command(args: &Args, show: bool, reset: bool) -> Result<()> {
    if reset {
        let path = AppConfig::reset(args.config.as_deref())?;
        println!("Configuration reset to defaults at {}", path.display());
    } else if show {
        println!("{}", resolve_config(args)?.show()?);
    } else {
        println!("Use --show to display current configuration or --reset to reset to defaults");
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
