//! Vesta CLI - headless runner for incremental worksheets.

mod check;
mod colors;
mod run;
mod sheet;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vesta")]
#[command(about = "Run and check Vesta worksheets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a worksheet and print a doctest-style transcript
    Run {
        /// Path to the worksheet
        file: PathBuf,

        /// Only run statements that start before this line (1-based)
        #[arg(long, value_name = "N")]
        until_line: Option<usize>,

        /// Engine configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Interrupt execution after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,
    },

    /// Compile every statement and report errors without running anything
    Check {
        /// Path to the worksheet
        file: PathBuf,

        /// Engine configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format vesta-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(vesta_err) = err.downcast_ref::<vesta_core::Error>() {
            anyhow::anyhow!("{}", vesta_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            file,
            until_line,
            config,
            timeout,
        } => {
            let options = run::RunOptions {
                until_line,
                config,
                timeout,
            };
            run::execute(&file, &options).map_err(format_error)?;
        }

        Commands::Check { file, config } => {
            check::execute(&file, config.as_deref()).map_err(format_error)?;
        }
    }

    Ok(())
}
