//! Data models for the Qt version engine.
//!
//! This module contains the value types shared by discovery, the registry and kits:
//! - [`Abi`]: Binary compatibility tuple (architecture, OS, flavor, format, word width)
//! - [`RawQueryResult`]: Parsed `<tool> -query` output
//! - [`InstallationMetadata`]: Everything derived from one query, cached on disk
//! - [`QtVersion`]: One installation as stored in the registry
//! - [`Subtype`]: Target-device classification picked from the descriptor table
//! - [`EngineConfig`] / [`VersionSettingsFile`]: Runtime configuration and settings documents
//!
//! # Architecture Note
//!
//! The models carry no resolution logic. Querying, ABI inference and mkspec
//! evaluation live in [`crate::services`] and write their results into these types.

pub mod abi;
pub mod config;
pub mod metadata;
pub mod qt_version;
pub mod query;
pub mod subtype;
pub mod toolchain;
pub mod version_number;

pub use abi::{Abi, Architecture, BinaryFormat, Os, OsFlavor};
pub use config::{EngineConfig, ToolchainConfig, VersionRecord, VersionSettingsFile};
pub use metadata::{BuildConfig, InstallationMetadata, METADATA_SCHEMA_VERSION};
pub use qt_version::{AbiState, NO_VERSION_ID, QtVersion};
pub use query::{PropertyVariant, RawQueryResult};
pub use subtype::{DeviceType, SetupData, Subtype};
pub use toolchain::{Environment, Toolchain};
pub use version_number::VersionNumber;
