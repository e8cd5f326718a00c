#![allow(dead_code)]

mod adapters;
mod app_lifecycle;
#[cfg(test)]
mod app_lifecycle_tests;
mod config;
mod core;
mod ports;

use crate::adapters::cli::console_cli_adapter::{ConsoleCliAdapter, CtrlCInterrupt};
use crate::adapters::config::file_store::TomlFileConfigAdapter;
use crate::adapters::service::sc_controller::ScController;
use crate::adapters::source::open_backends;
use crate::app_lifecycle::{AppLifecycleManager, RunOptions};
use crate::config::models::{AppConfig, LogFormat, LoggingConfig};
use crate::core::error::{ConfigError, UpdateError};
use crate::core::types::{MessageLevel, UpdateResult};
use crate::ports::{ConfigurationStore, UserInteractionPort};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Updates an installed iikoRMS or iikoChain server", long_about = None)]
struct CliArgs {
    #[clap(long, value_name = "PATH", help = "Configuration file to use instead of iiko_updater.toml")]
    config: Option<PathBuf>,

    #[clap(long, value_name = "SERVICE", help = "Service name of the server to update")]
    server: Option<String>,

    #[clap(long, value_name = "LABEL", help = "Release to install, e.g. \"FTP 9.1\"")]
    release: Option<String>,

    #[clap(long, action, help = "Answer yes to every yes/no question")]
    yes: bool,

    #[clap(long, value_name = "PATH", help = "Write the final result as JSON")]
    report: Option<PathBuf>,
}

fn init_logger_cli(logging_config: &LoggingConfig, terminal_colors_enabled: bool) {
    let env_filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| logging_config.level.clone());
    let env_filter = EnvFilter::try_new(&env_filter_str).unwrap_or_else(|e| {
        eprintln!("[LOGGER WARN] Failed to parse log level '{env_filter_str}': {e}. Defaulting to 'warn'.");
        EnvFilter::new("warn")
    });

    let subscriber_builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match logging_config.format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            subscriber_builder
                .pretty()
                .with_ansi(terminal_colors_enabled)
                .finish(),
        ),
        LogFormat::Json => {
            tracing::subscriber::set_global_default(subscriber_builder.json().finish())
        }
        LogFormat::Compact => tracing::subscriber::set_global_default(
            subscriber_builder
                .compact()
                .with_ansi(terminal_colors_enabled)
                .finish(),
        ),
    };
    if let Err(e) = installed {
        eprintln!("[LOGGER WARN] Logger already initialized: {e}");
    }
    info!(
        "Logger initialized with filter '{}' and format {:?}",
        env_filter_str, logging_config.format
    );
}

fn resolve_config_path(
    cli_path: Option<PathBuf>,
    store: &dyn ConfigurationStore,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = cli_path {
        return Ok(path);
    }
    let found = config::find_config_file()?;
    if found.exists() {
        Ok(found)
    } else {
        store.get_default_config_path()
    }
}

fn write_report(path: &Path, outcome: &Result<UpdateResult, UpdateError>) -> anyhow::Result<()> {
    let body = match outcome {
        Ok(result) => serde_json::to_string_pretty(result)?,
        Err(e) => serde_json::to_string_pretty(&serde_json::json!({
            "succeeded": false,
            "backup_path": null,
            "log_monitoring_skipped": false,
            "failed_stage": null,
            "error": e.to_string(),
        }))?,
    };
    std::fs::write(path, body)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli_args = CliArgs::parse();
    let console_supports_color = supports_color::on(supports_color::Stream::Stdout).is_some();

    let startup_filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    let startup_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(&startup_filter_str))
        .with_ansi(console_supports_color)
        .compact()
        .with_writer(std::io::stderr)
        .finish();
    let startup_guard = tracing::subscriber::set_default(startup_subscriber);
    info!("Temporary startup logger active (filter: {})", startup_filter_str);

    let config_base_path = std::env::current_dir()?;
    let config_store: Arc<dyn ConfigurationStore> =
        Arc::new(TomlFileConfigAdapter::new(config_base_path));
    let config_path = resolve_config_path(cli_args.config.clone(), config_store.as_ref())?;

    let app_config: AppConfig = match config_store.load_app_config_file(&config_path) {
        Ok(cfg) => cfg,
        Err(ConfigError::DefaultCreated(path)) => {
            eprintln!(
                "No configuration found. A default was written to {}. Fill in [sources] and run again.",
                path.display()
            );
            return Ok(ExitCode::from(2));
        }
        Err(e) => {
            eprintln!("[CRITICAL] Failed to load configuration {}: {e}", config_path.display());
            return Err(e.into());
        }
    };

    drop(startup_guard);
    let colors_enabled = app_config.cli.enable_colors && console_supports_color;
    init_logger_cli(&app_config.logging, colors_enabled);
    info!("Configuration loaded from {:?}", config_path);

    let console = Arc::new(ConsoleCliAdapter::new(colors_enabled, cli_args.yes));
    let user_interaction: Arc<dyn UserInteractionPort> = console.clone();
    console.display_heading("iiko server updater");

    if !app_config.has_sources() {
        warn!("No [sources] configured in {:?}", config_path);
    }
    let backends = open_backends(&app_config.sources).await;

    let manager = AppLifecycleManager::new(
        app_config,
        Arc::new(ScController::new()),
        Arc::clone(&user_interaction),
        CtrlCInterrupt::install(),
        RunOptions {
            server: cli_args.server.clone(),
            release: cli_args.release.clone(),
        },
    );
    let outcome = manager.run(backends).await;

    if let Some(report_path) = &cli_args.report {
        if let Err(e) = write_report(report_path, &outcome) {
            error!("Writing report {:?} failed: {}", report_path, e);
        }
    }

    match outcome {
        Ok(result) if result.succeeded => {
            let verdict = if result.log_monitoring_skipped {
                "Update finished; the server start was not verified."
            } else {
                "Update finished and verified."
            };
            user_interaction.display_message(verdict, MessageLevel::Success);
            Ok(ExitCode::SUCCESS)
        }
        Ok(result) => {
            error!("Update failed during {:?}", result.failed_stage);
            Ok(ExitCode::FAILURE)
        }
        Err(UpdateError::Cancelled) => {
            user_interaction.display_message("Update cancelled.", MessageLevel::Warning);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            user_interaction.display_error(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}
