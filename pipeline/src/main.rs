//! Shipyard - Entry Point
//!
//! Runs the selected pipeline roles: `--role=all` (default) or a comma-separated list of
//! `clone`, `frontend-build`, `backend-build`, `deploy` and `reconciler`.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use shipyard::app::options::{parse_roles, AppOptions};
use shipyard::app::run::run;
use shipyard::filesys::file::File;
use shipyard::logs::init_logging;
use shipyard::storage::settings::{Settings, DEFAULT_SETTINGS_PATH};
use shipyard::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file; a missing file means defaults
    let settings_path = cli_args
        .get("settings")
        .map(String::as_str)
        .unwrap_or(DEFAULT_SETTINGS_PATH);
    let mut settings = match File::new(settings_path).read_json_opt::<Settings>().await {
        Ok(Some(settings)) => settings,
        Ok(None) => Settings::default(),
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_path, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = settings.apply_env_overrides(|name| env::var(name).ok()) {
        eprintln!("Invalid environment: {}", e);
        return ExitCode::FAILURE;
    }

    // Initialize logging
    if let Err(e) = init_logging(settings.log.to_options()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let roles = match parse_roles(cli_args.get("role").map(String::as_str).unwrap_or("all")) {
        Ok(roles) => roles,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = AppOptions::from_settings(settings, roles);
    info!("Running shipyard with roles {:?}", options.roles);

    match run(version.version, options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run shipyard: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
