//! onionsim - anonymity network traffic simulator.
//!
//! Simulates clients building circuits through a historical relay
//! population and writes a trace marking which circuits a bounded
//! adversary could correlate.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use onionsim_core::tracing_setup::{CliLogLevel, init_tracing};
use onionsim_sim::{ErrorCategory, SimulationError};

#[derive(Parser)]
#[command(name = "onionsim")]
#[command(about = "Simulates Tor-like traffic under a partial adversary")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    run: commands::RunArgs,

    /// Console log level (RUST_LOG overrides)
    #[arg(long, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for a full trace-level run log
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.log_dir.as_deref()) {
        eprintln!("error[{}]: failed to initialize logging: {e}", ErrorCategory::Io);
        return ExitCode::from(ErrorCategory::Io.exit_code());
    }

    match commands::run(&cli.run) {
        Ok(report) => {
            println!("{}", report.summary());
            ExitCode::SUCCESS
        }
        Err(e) => {
            let category = category_of(&e);
            tracing::error!(%category, "Run aborted: {e:#}");
            eprintln!("error[{category}]: {e:#}");
            ExitCode::from(category.exit_code())
        }
    }
}

/// Category of the simulation error behind `error`, if any.
fn category_of(error: &anyhow::Error) -> ErrorCategory {
    error
        .downcast_ref::<SimulationError>()
        .map_or(ErrorCategory::Internal, SimulationError::category)
}
