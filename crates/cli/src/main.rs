//! FaqWorks CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse arguments**: global `--config`, `--state-dir` and
//!    `--log-format` flags plus one subcommand (see [`args`]).
//! 2. **Wire observability**: a `tracing-subscriber` JSON or pretty layer on
//!    stderr, plus an OpenTelemetry OTLP exporter when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 3. **Construct infrastructure**: the TOML `ConfigStore`, the JSON
//!    `StateStore` and the `reqwest` transport, injected into the
//!    `OrchestratorBuilder`.
//! 4. **Run one command**: print its JSON result on stdout and persist the
//!    orchestrator state for the next run.
//!
//! Exit status is non-zero whenever the printed document is an error.

mod args;
mod commands;
mod telemetry;

use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing::error;

use crate::args::Cli;
use crate::commands::Failure;
use crate::telemetry::Telemetry;

fn print(document: &Value) {
    match serde_json::to_string_pretty(document) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render output: {e}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = match Telemetry::init(cli.log_format) {
        Ok(telemetry) => Some(telemetry),
        Err(e) => {
            eprintln!("telemetry disabled: {e:#}");
            None
        }
    };

    let code = match commands::run(&cli).await {
        Ok(outcome) => {
            print(&outcome.document);
            if outcome.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            print(&Failure::internal(&e).document());
            ExitCode::FAILURE
        }
    };

    if let Some(telemetry) = telemetry {
        telemetry.shutdown();
    }
    code
}
