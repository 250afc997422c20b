//! Services module - discovery and resolution logic for Qt installations.
//!
//! Everything here is free of registry state: services take a tool path or a
//! [`QtVersion`](crate::models::QtVersion) and produce data. The registry in
//! [`crate::state`] decides when to call them and merges the results.
//!
//! # Components
//!
//! - [`QueryToolInvoker`]: Runs `<tool> -query` through the [`ProcessRunner`] seam, with:
//!   - A hard timeout per invocation
//!   - A trustworthiness check on the output
//!   - One retry per registered toolchain environment
//!
//! - [`parse_query_output`]: Turns raw query output into a
//!   [`RawQueryResult`](crate::models::RawQueryResult).
//!
//! - [`AbiExtractor`]: Infers target ABIs, trying in order:
//!   1. The `Core.json` module metadata descriptor
//!   2. Decoding the core library binary (ELF, PE, Mach-O, ar)
//!   3. The build banner embedded in the core library (Windows flavor refinement)
//!
//! - [`MetadataResolver`] / [`VersionResolver`]: Derive and cache
//!   [`InstallationMetadata`](crate::models::InstallationMetadata), then complete a version's ABIs.
//!
//! - [`VersionFactory`]: Picks the subtype from the descriptor table and builds versions
//!   from tool paths or persisted records.
//!
//! - [`PathScanner`] and [`InstallerWatcher`]: PATH seeding and the debounced watch on
//!   the installer settings file.
//!
//! # Concurrency
//!
//! Query invocations and binary scans are the only blocking work. They run on tokio
//! (`spawn_blocking` for file decoding) and can proceed for many installations at once.

pub mod abi;
pub mod factory;
pub mod installer_watch;
pub mod metadata;
pub mod mkspec;
pub mod path_scan;
pub mod query_parser;
pub mod query_tool;

pub use abi::{AbiExtractor, BuildBanner, MetadataParseError};
pub use factory::{FactoryError, VersionFactory, identify};
pub use installer_watch::{InstallerChanged, InstallerWatcher};
pub use metadata::{MetadataCache, MetadataResolver, VersionResolver};
pub use mkspec::{MkspecInfo, ProFileEvaluator};
pub use path_scan::PathScanner;
pub use query_parser::parse_query_output;
pub use query_tool::{ProcessOutput, ProcessRunner, QueryError, QueryToolInvoker, TokioProcessRunner};
