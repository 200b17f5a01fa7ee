//! Main CLI entry point of the buildd worker

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing_subscriber::EnvFilter;

mod commands;

/// buildd worker - run package builds inside disposable sandboxes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Configuration file path (global option)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a build job to its disposition
    Run {
        /// Job description (JSON)
        #[arg(short, long, value_name = "FILE")]
        job: PathBuf,

        /// Write the build summary as JSON to this file
        #[arg(short, long, value_name = "FILE")]
        result: Option<PathBuf>,

        /// Log step progress instead of drawing a spinner
        #[arg(long)]
        no_progress: bool,
    },

    /// Validate a job description and show the planned steps
    Validate {
        /// Job description (JSON)
        #[arg(short, long, value_name = "FILE")]
        job: PathBuf,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, value_name = "FILE", default_value = "buildd.yaml")]
        output: PathBuf,

        /// Force overwrite existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet)?;

    let result = match cli.command {
        Commands::Run { job, result, no_progress } => {
            let command = commands::RunCommand::new(cli.config, job, result, !no_progress);
            command.execute().await
        }

        Commands::Validate { job } => {
            let command = commands::ValidateCommand::new(cli.config, job);
            command.execute().await
        }

        Commands::Init { output, force } => {
            let command = commands::InitCommand::new(output, force);
            command.execute().await
        }
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn setup_logging(verbose: u8, quiet: u8) -> Result<()> {
    let log_level = match (verbose, quiet) {
        (0, 0) => "info",
        (1, 0) => "debug",
        (v, 0) if v >= 2 => "trace",
        (0, 1) => "warn",
        (0, 2) => "error",
        (0, q) if q > 2 => "off",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
