// app-bootstrap
// First-run initialization and provisioning engine.

pub mod api;
pub mod database;
pub mod environment;
pub mod error;
pub mod installation;
pub mod models;
pub mod security;
pub mod settings;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{InitError, InitResult};
pub use installation::orchestrator::{InitPhase, Orchestrator, ProvisionOutcome};
pub use settings::Settings;

use log::{error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::models::requests::{DatabaseRequest, ProvisionRequest};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

const USAGE: &str = "\
Usage: app-bootstrap [--verbose] <command>

Commands:
  status                       Print initialization status
  provision <request.json>     Run first-run provisioning
  test-connection <db.json>    Test a database configuration
  configs                      List stored database configurations
  settings                     Print effective settings as TOML
  reset --yes                  Remove the initialization marker (development only)
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status,
    Provision(String),
    TestConnection(String),
    Configs,
    Settings,
    Reset,
}

fn parse_args(args: &[String]) -> Result<(Command, bool), String> {
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    let rest: Vec<&str> = args
        .iter()
        .skip(1)
        .map(String::as_str)
        .filter(|a| *a != "--verbose" && *a != "-v")
        .collect();

    let command = match rest.as_slice() {
        ["status"] => Command::Status,
        ["provision", file] => Command::Provision(file.to_string()),
        ["test-connection", file] => Command::TestConnection(file.to_string()),
        ["configs"] => Command::Configs,
        ["settings"] => Command::Settings,
        ["reset", "--yes"] => Command::Reset,
        ["reset"] => return Err("reset is destructive; pass --yes to confirm".to_string()),
        [] => return Err("missing command".to_string()),
        other => return Err(format!("unrecognized arguments: {}", other.join(" "))),
    };
    Ok((command, verbose))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    use anyhow::Context;
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {:?}", path))
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{}", s);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Failed to render output: {}", e);
            EXIT_FAILURE
        }
    }
}

/// CLI entry point. Returns the process exit code.
pub fn run_cli(args: Vec<String>) -> i32 {
    let (command, verbose) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            return EXIT_USAGE;
        }
    };

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return EXIT_FAILURE;
        }
    };

    // Logging problems must not block provisioning.
    match utils::path_resolver::resolve_log_folder(settings.log_dir.as_deref(), &settings.data_dir)
    {
        Ok(log_dir) => {
            if let Err(e) = utils::logging::init_logging(&log_dir, settings.level_filter(), verbose) {
                eprintln!("warning: logging disabled: {:#}", e);
            }
        }
        Err(e) => eprintln!("warning: logging disabled: {:#}", e),
    }

    if command == Command::Settings {
        return match settings.to_toml() {
            Ok(toml) => {
                print!("{}", toml);
                EXIT_OK
            }
            Err(e) => {
                eprintln!("error: {:#}", e);
                EXIT_FAILURE
            }
        };
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("[PHASE: startup] Failed to start async runtime: {}", e);
            eprintln!("error: failed to start async runtime: {}", e);
            return EXIT_FAILURE;
        }
    };

    info!("[PHASE: startup] Running command {:?}", command);
    let orchestrator = Orchestrator::from_settings(settings);
    runtime.block_on(run_command(&orchestrator, command))
}

async fn run_command(orchestrator: &Orchestrator, command: Command) -> i32 {
    match command {
        Command::Status => print_json(&api::setup::get_status(orchestrator).await),
        Command::Provision(file) => {
            let request = match read_json::<ProvisionRequest>(Path::new(&file)) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("error: {:#}", e);
                    return EXIT_USAGE;
                }
            };
            let response = api::setup::provision(orchestrator, Some(request)).await;
            let code = print_json(&response);
            if response.is_success() {
                code
            } else {
                EXIT_FAILURE
            }
        }
        Command::TestConnection(file) => {
            let request = match read_json::<DatabaseRequest>(Path::new(&file)) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("error: {:#}", e);
                    return EXIT_USAGE;
                }
            };
            let response = api::setup::test_database_connection(orchestrator, Some(request)).await;
            let passed = response.data.as_ref().map(|r| r.success).unwrap_or(false);
            let code = print_json(&response);
            if passed {
                code
            } else {
                EXIT_FAILURE
            }
        }
        Command::Configs => {
            let response = api::setup::list_database_configs(orchestrator).await;
            let code = print_json(&response);
            if response.success {
                code
            } else {
                EXIT_FAILURE
            }
        }
        Command::Reset => {
            let response = api::setup::reset(orchestrator).await;
            let code = print_json(&response);
            if response.success {
                code
            } else {
                EXIT_FAILURE
            }
        }
        // Handled before the runtime starts.
        Command::Settings => EXIT_OK,
    }
}
