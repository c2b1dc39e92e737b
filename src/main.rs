//! dx-runner: filesystem-supervised dispatcher for unattended coding-agent runs.
//!
//! This is the main entry point for the `dx-runner` CLI. It parses arguments,
//! dispatches to the appropriate command handler, and maps errors to stable
//! exit codes (with a JSON error object on stdout under `--json`).

mod cli;
mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod gates;
pub mod git;
pub mod job;
mod logging;
pub mod monitor;
pub mod process;
pub mod provider;

#[cfg(test)]
mod test_support;

use cli::Cli;
use serde_json::json;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(if cli.command.is_monitor() { "info" } else { "warn" });
    let json = cli.global.json;

    match commands::dispatch(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            let code = err.exit_code();
            if json {
                println!(
                    "{}",
                    json!({
                        "ok": false,
                        "reason_code": err.reason_code(),
                        "exit_code": code,
                        "error": err.to_string(),
                    })
                );
            } else {
                eprintln!("Error: {}", err);
            }
            ExitCode::from(code as u8)
        }
    }
}
