//! qtversions - command-line front end for the Qt version registry.
//!
//! # Overview
//!
//! Initializes, in order:
//! - Configuration ([`ConfigManager`]): engine config layering and settings file locations
//! - Logging (daily rotating file, optional console output)
//! - Tokio runtime (query tools and binary scans run on its workers)
//! - The [`VersionRegistry`], loaded once the configured toolchains are known
//!
//! # Commands
//!
//! - `list`: print every registered version (`--resolve` queries tools first)
//! - `add <qmake>`: query a tool and register it
//! - `remove <id>`: unregister a version
//! - `abis <path>`: print the ABIs of a tool (or of a library with `--library`)
//! - `cleanup`: remove versions that are not valid
//! - `watch`: follow the installer settings file and print registry events

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use qtversions::logging::{LOG_PREFIX, LogOptions};
use qtversions::models::{NO_VERSION_ID, QtVersion, Toolchain};
use qtversions::services::TokioProcessRunner;
use qtversions::{APP_NAME, ConfigManager, Metrics, RegistryEvent, VERSION, VersionRegistry};
use std::sync::Arc;

/// Discover Qt installations and manage the version registry.
#[derive(Parser, Debug)]
#[command(name = "qtversions")]
#[command(version, about)]
struct Cli {
    /// Directory holding settings, cache and engine configuration.
    #[arg(long, value_name = "DIR", default_value = "qtversions-data")]
    config_dir: Utf8PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    debug: bool,

    /// Also log to the console.
    #[arg(short, long)]
    verbose: bool,

    /// Write log files as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// List registered Qt versions.
    List {
        /// Query every tool before listing.
        #[arg(long)]
        resolve: bool,
    },

    /// Register the Qt installation owning a qmake binary.
    Add {
        #[arg(value_name = "QMAKE")]
        path: Utf8PathBuf,
    },

    /// Unregister a Qt version by id.
    Remove { id: i32 },

    /// Print the ABIs of a qmake binary or a library.
    Abis {
        path: Utf8PathBuf,

        /// Treat PATH as a library instead of a query tool.
        #[arg(long)]
        library: bool,
    },

    /// Remove every invalid Qt version.
    Cleanup {
        /// Only print what would be removed.
        #[arg(long)]
        dry_run: bool,
    },

    /// Follow the installer settings file until interrupted.
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigManager::new(&cli.config_dir)?;
    let engine = config.load_engine_config()?;
    config.apply_engine_config(&engine);

    let log_dir = {
        let dir = Utf8PathBuf::from(&engine.log_dir);
        if dir.is_absolute() {
            dir
        } else {
            config.config_dir().join(dir)
        }
    };
    let _guard = qtversions::logging::setup_logging_with_console(
        &log_dir,
        LOG_PREFIX,
        LogOptions {
            debug_mode: cli.debug || engine.debug_mode,
            console_output: cli.verbose,
            json: cli.json_logs,
        },
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("qtversions-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    let metrics = Arc::new(Metrics::new());
    let toolchains: Vec<Toolchain> = engine.toolchains.iter().cloned().map(Toolchain::from).collect();

    let result = runtime.block_on(async {
        let registry = Arc::new(VersionRegistry::build(
            config,
            &engine,
            Arc::new(TokioProcessRunner),
            metrics.clone(),
        ));
        registry.on_toolchains_loaded(toolchains).await?;

        let outcome = run(&registry, cli.command).await;
        registry.shutdown();
        outcome
    });

    metrics.log_summary();
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

async fn run(registry: &Arc<VersionRegistry>, command: Command) -> Result<()> {
    match command {
        Command::List { resolve } => {
            if resolve {
                registry.resolve_all().await?;
            }
            let versions = registry.versions();
            if versions.is_empty() {
                println!("No Qt versions registered.");
            }
            for version in &versions {
                print_version(version);
            }
        }
        Command::Add { path } => {
            let path = absolute(&path)?;
            if let Some(existing) = registry.find_by_tool_path(&path) {
                println!("{} is already registered as id {}", path, existing.unique_id());
                return Ok(());
            }
            let id = registry.allocate_id();
            let version = registry
                .factory()
                .create_from_tool_path(&path, false, "", id)
                .await
                .with_context(|| format!("Failed to query {}", path))?;
            print_version(&version);
            registry.add(version)?;
        }
        Command::Remove { id } => {
            let removed = registry.remove(id)?;
            println!("Removed {} ({})", removed.display_name(), removed.tool_path());
        }
        Command::Abis { path, library } => {
            let path = absolute(&path)?;
            let abis = if library {
                let extractor = registry.factory().resolver().abi_extractor().clone();
                let library_path = path.clone();
                let banner_path = path.clone();
                let banner_extractor = extractor.clone();
                if let Some(banner) =
                    tokio::task::spawn_blocking(move || banner_extractor.banner(&banner_path)).await?
                {
                    println!("Build banner: Qt {} by {}", banner.version, banner.compiler);
                }
                tokio::task::spawn_blocking(move || extractor.abis_of_library(&library_path)).await?
            } else {
                let version = registry
                    .factory()
                    .create_from_tool_path(&path, false, "", NO_VERSION_ID)
                    .await
                    .with_context(|| format!("Failed to query {}", path))?;
                version.abis_or_empty().to_vec()
            };
            if abis.is_empty() {
                println!("No ABI detected for {}", path);
            }
            for abi in abis {
                println!("{}", abi);
            }
        }
        Command::Cleanup { dry_run } => {
            registry.resolve_all().await?;
            let invalid = registry.invalid_version_ids();
            for id in &invalid {
                if let Some(version) = registry.version(*id) {
                    println!(
                        "{} {}: {}",
                        id,
                        version.display_name(),
                        version.invalid_reason().unwrap_or_default()
                    );
                }
            }
            if invalid.is_empty() {
                println!("All Qt versions are valid.");
            } else if !dry_run {
                let removed = registry.remove_many(&invalid)?;
                println!("Removed {} invalid version(s).", removed.len());
            }
        }
        Command::Watch => {
            let mut events = registry.subscribe();
            registry.watch_installer()?;
            println!(
                "Watching {} (Ctrl+C to stop)",
                registry.config().installer_settings_path()
            );
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(RegistryEvent::VersionsChanged { added, removed, changed }) => {
                            println!("added {:?} removed {:?} changed {:?}", added, removed, changed);
                        }
                        Ok(RegistryEvent::VersionsLoaded) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!("Missed {} registry event(s)", missed);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
    }
    Ok(())
}

fn print_version(version: &QtVersion) {
    let state = match version.invalid_reason() {
        Some(reason) => format!("invalid: {}", reason),
        None => "valid".to_string(),
    };
    println!(
        "{:>4}  {}  [{}]  {}",
        version.unique_id(),
        version.display_name(),
        state,
        version.tool_path()
    );
    let abis: Vec<String> = version.abis_or_empty().iter().map(ToString::to_string).collect();
    if !abis.is_empty() {
        println!("      ABIs: {}", abis.join(", "));
    }
    for warning in version.warning_reasons() {
        println!("      warning: {}", warning);
    }
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let cwd = Utf8PathBuf::try_from(cwd).context("Current directory is not valid UTF-8")?;
    Ok(cwd.join(path))
}
