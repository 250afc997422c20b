// qtversions - discovery, ABI inference and registry for Qt installations
//
// This is the library crate containing the engine. The binary crate (main.rs)
// provides a command-line front end.

pub mod config;
pub mod kit;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use kit::{Kit, KitAspect, KitError};
pub use metrics::Metrics;
pub use models::{Abi, EngineConfig, InstallationMetadata, QtVersion, Subtype};
pub use state::{RegistryError, RegistryEvent, RegistryPhase, VersionRegistry};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
