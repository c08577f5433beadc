//! # Pixelgate Configuration Validator
//!
//! Command-line tool for validating Pixelgate configuration files across environments.
//! Catches configuration issues before the resolution pipeline is started.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pixelgate_core::config::{ConfigManager, PixelgateConfig};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Pixelgate configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: $PIXELGATE_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole configuration
    All,

    /// Validate a single section
    Component {
        /// Section name (storage, cache, fetch, circuit_breaker, deduplication, transform, limits)
        name: String,
    },

    /// List available environments
    Environments,

    /// Print the resolved configuration with credentials masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Show) => show_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate_all_config(cli: &Cli) -> Result<()> {
    println!("🔧 Validating Pixelgate Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let manager = load(cli)?;
    println!("✅ Configuration loaded and validated");

    let config = manager.config();
    for section in SECTIONS {
        describe_section(config, section)?;
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

const SECTIONS: [&str; 8] = [
    "storage",
    "cache",
    "fetch",
    "circuit_breaker",
    "breaker_registry",
    "deduplication",
    "transform",
    "limits",
];

fn validate_component(cli: &Cli, component_name: &str) -> Result<()> {
    println!("🔧 Validating Component: {component_name}");
    let manager = load(cli)?;
    describe_section(manager.config(), &component_name.to_lowercase().replace('-', "_"))?;
    println!("✅ Component '{component_name}' validation passed!");
    Ok(())
}

fn describe_section(config: &PixelgateConfig, section: &str) -> Result<()> {
    match section {
        "storage" => {
            println!("🗄️  Storage");
            println!("   ✅ Root: {}", config.storage.root_dir.display());
            if config.storage.default_asset_path.exists() {
                println!(
                    "   ✅ Default asset: {}",
                    config.storage.default_asset_path.display()
                );
            } else {
                println!(
                    "   ⚠️  Default asset missing: {} (fallbacks will surface fetch errors)",
                    config.storage.default_asset_path.display()
                );
            }
        }
        "cache" => {
            println!("📦 Cache");
            println!(
                "   ✅ Memory: enabled={}, capacity={} bytes",
                config.cache.memory.enabled, config.cache.memory.max_capacity_bytes
            );
            println!(
                "   ✅ File: enabled={}, directory={}",
                config.cache.file.enabled,
                config.cache.file.directory.display()
            );
            println!(
                "   ✅ Distributed: enabled={}, timeout={}ms, retries={}",
                config.cache.distributed.enabled,
                config.cache.distributed.timeout_ms,
                config.cache.distributed.retries
            );
            if config.cache.distributed.enabled && !cfg!(feature = "cache-redis") {
                println!("   ⚠️  Distributed layer enabled but this build lacks `cache-redis`");
            }
        }
        "fetch" => {
            println!("🌐 Fetch");
            println!(
                "   ✅ Timeout: {}ms, max redirects: {}",
                config.fetch.timeout_ms, config.fetch.max_redirects
            );
        }
        "circuit_breaker" => {
            let breaker = &config.circuit_breaker;
            println!("🔌 Circuit Breaker");
            println!(
                "   ✅ Trips above {}% failures once {} outcomes are recorded, retries after {}ms",
                breaker.failure_threshold, breaker.minimum_requests, breaker.reset_timeout_ms
            );
        }
        "breaker_registry" => {
            let registry = &config.breaker_registry;
            println!("🗂️  Breaker registry");
            println!(
                "   ✅ Up to {} hosts, idle timeout {}ms",
                registry.max_hosts, registry.idle_timeout_ms
            );
        }
        "deduplication" => {
            let dedup = &config.deduplication;
            println!("🔁 Deduplication");
            println!(
                "   ✅ Grace delay {}ms, max pending age {}ms, leader deadline {}ms",
                dedup.grace_delay_ms,
                dedup.max_pending_age_ms,
                dedup.to_deduplicator_config().leader_deadline().as_millis()
            );
        }
        "transform" => {
            println!("🖼️  Transform");
            println!("   ✅ Workers: {}", config.transform.max_concurrent);
        }
        "limits" => {
            println!("📏 Limits");
            println!(
                "   ✅ Max resize target: {}x{} ({} pixels)",
                config.limits.max_width,
                config.limits.max_height,
                config.limits.max_pixels()
            );
        }
        other => bail!("Unknown component: {other}"),
    }
    Ok(())
}

fn list_environments(cli: &Cli) -> Result<()> {
    println!("📋 Available Environments:");

    let base = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config"));
    let env_dir = base.join("environments");
    if !env_dir.exists() {
        println!(
            "❌ Configuration environments directory not found: {}",
            env_dir.display()
        );
        return Ok(());
    }

    let mut environments = Vec::new();
    for entry in std::fs::read_dir(&env_dir)
        .with_context(|| format!("reading {}", env_dir.display()))?
    {
        let path = entry?.path();
        if let Some(name) = environment_name(&path) {
            environments.push(name);
        }
    }
    environments.sort();

    for env in environments {
        println!("  • {env}");
    }
    Ok(())
}

fn environment_name(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != "toml" {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

fn show_config(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}
