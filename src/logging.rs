//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and to a
//! JSON log file, for following concurrent resolutions through the pipeline.

use crate::config::ConfigManager;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

const LOG_DIR: &str = "log";

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` overrides the per-environment default level. When the log
/// directory cannot be created, only the console layer is installed.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let pid = process::id();

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(env_filter(&log_level));

        let log_dir = PathBuf::from(LOG_DIR);
        let file_name = log_file_name(&environment, pid);
        let file_layer = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::never(&log_dir, &file_name);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                // Lives for the rest of the process
                std::mem::forget(guard);
                Some(
                    fmt::layer()
                        .with_writer(file_writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(env_filter(&log_level)),
                )
            }
            Err(e) => {
                eprintln!("pixelgate: file logging disabled, cannot create {LOG_DIR}/: {e}");
                None
            }
        };

        let log_file = match &file_layer {
            Some(_) => log_dir.join(&file_name).display().to_string(),
            None => "none".to_string(),
        };
        if tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            // Another subscriber (e.g. a test harness) owns the global slot
            tracing::debug!("Global tracing subscriber already initialized");
            return;
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_file,
            "Structured logging initialized"
        );
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn log_file_name(environment: &str, pid: u32) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    format!("{environment}.{pid}.{timestamp}.log")
}

fn get_environment() -> String {
    ConfigManager::detect_environment()
}

/// Default log level for an environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        "test" => "pixelgate_core=debug,warn".to_string(),
        _ => "debug".to_string(),
    }
}
