//! upnotifier - Entry Point
//!
//! Watches a notification server for newly deployed application versions and
//! prompts (or automatically triggers) a reload.

use std::collections::HashMap;
use std::env;

use colored::Colorize;
use secrecy::SecretString;
use upnotifier::app::options::AppOptions;
use upnotifier::app::run::{check_once, login, logout, run};
use upnotifier::authn::session::LoginOutcome;
use upnotifier::logs::{init_logging, LogOptions};
use upnotifier::storage::layout::StorageLayout;
use upnotifier::storage::settings::Settings;
use upnotifier::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
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
            Err(e) => eprintln!("Failed to serialize version info: {e}"),
        }
        return;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, defaults when absent
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {e}");
                return;
            }
        }
    } else {
        Settings::default()
    }
    .with_env_overrides();

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: Some(layout.logs_dir()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let mut options = AppOptions::from_settings(&settings, layout);
    if cli_args.contains_key("auto-update") {
        options.manager.dispatcher.auto_update = true;
    }

    if cli_args.contains_key("check") {
        match check_once(&options).await {
            Ok(report) => match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to serialize check report: {e}"),
            },
            Err(e) => error!("Update check failed: {e}"),
        }
        return;
    }

    if cli_args.contains_key("logout") {
        match logout(&options).await {
            Ok(()) => println!("{}", "Logged out".green()),
            Err(e) => error!("Failed to log out: {e}"),
        }
        return;
    }

    if cli_args.contains_key("login") {
        let (Some(usuario), Some(password)) = (cli_args.get("usuario"), cli_args.get("password"))
        else {
            error!("Run: upnotifier --login --usuario=<user> --password=<password>");
            return;
        };
        match login(&options, usuario, SecretString::from(password.clone())).await {
            Ok(LoginOutcome::Success(user)) => {
                println!("{} {}", "Logged in as".green(), user.usuario.bold());
            }
            Ok(LoginOutcome::Failure { message }) => {
                println!("{} {}", "Login failed:".red(), message);
            }
            Err(e) => error!("Failed to log in: {e}"),
        }
        return;
    }

    // Run the watcher
    info!(
        "Running upnotifier {} against {} (push: {})",
        version.version, options.api_url, options.socket_url
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the notifier: {e}");
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
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
