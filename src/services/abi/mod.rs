//! ABI inference for Qt installations.
//!
//! Strategies, first one with a result wins:
//!
//! 1. [`module_json`]: the `Core.json` module descriptor (Qt 6 and later)
//! 2. [`binary`]: header decode of the core library found by [`core_library`]
//! 3. [`banner`]: the embedded build banner, used to fill in a compiler flavor the
//!    headers did not reveal
//!
//! Failure is not an error: an installation without ABIs stays in the registry
//! and reports a warning.

pub mod banner;
pub mod binary;
pub mod core_library;
pub mod module_json;

pub use banner::BuildBanner;
pub use core_library::{CoreLibraries, find_core_libraries};
pub use module_json::MetadataParseError;

use crate::metrics::Metrics;
use crate::models::abi::push_unique;
use crate::models::{Abi, InstallationMetadata, OsFlavor, VersionNumber};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Infers ABIs and memoizes banner scans per binary path.
///
/// Safe to share between tasks; all methods do blocking file I/O and should run
/// on a blocking thread.
#[derive(Debug)]
pub struct AbiExtractor {
    banners: Mutex<HashMap<Utf8PathBuf, Option<BuildBanner>>>,
    metrics: Arc<Metrics>,
}

impl AbiExtractor {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            banners: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Infer ABIs from explicit inputs.
    pub fn infer_abis(
        &self,
        core_libraries: &[Utf8PathBuf],
        version: VersionNumber,
        metadata_dirs: &[&Utf8Path],
    ) -> Vec<Abi> {
        if version.major >= 6 {
            if let Some(descriptor) = module_json::find_core_descriptor(metadata_dirs) {
                match module_json::abis_from_descriptor_file(&descriptor, version) {
                    Ok(abis) if !abis.is_empty() => {
                        tracing::debug!("ABIs of {} taken from {}", version, descriptor);
                        return abis;
                    }
                    Ok(_) => {
                        tracing::debug!("{} lists no usable targets, reading binaries", descriptor)
                    }
                    Err(e) => tracing::warn!("Ignoring module descriptor {}: {}", descriptor, e),
                }
            }
        }

        let mut abis = Vec::new();
        for library in core_libraries {
            for abi in self.abis_of_library(library) {
                push_unique(&mut abis, abi);
            }
        }
        abis
    }

    /// Infer ABIs for a resolved installation, locating descriptor and libraries
    /// from its paths.
    pub fn infer_for(&self, metadata: &InstallationMetadata) -> Vec<Abi> {
        let modules: Vec<Utf8PathBuf> = [&metadata.arch_data, &metadata.data, &metadata.prefix]
            .into_iter()
            .filter(|base| !base.as_str().is_empty())
            .map(|base| base.join("modules"))
            .collect();
        let metadata_dirs: Vec<&Utf8Path> = modules.iter().map(Utf8PathBuf::as_path).collect();

        let libraries = find_core_libraries(&[metadata.library.as_path(), metadata.bin.as_path()]);
        let abis = self.infer_abis(libraries.preferred(), metadata.version(), &metadata_dirs);

        if abis.is_empty() {
            self.metrics.record_abi_failure();
            tracing::warn!(
                "ABI detection failed for {} (no usable descriptor or core library)",
                metadata.tool_path
            );
        }
        abis
    }

    /// Header decode of one library, with the flavor refined from its build banner
    /// where the headers left it open.
    pub fn abis_of_library(&self, library: &Utf8Path) -> Vec<Abi> {
        let mut abis = match binary::abis_of_file(library) {
            Ok(abis) => abis,
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", library, e);
                return Vec::new();
            }
        };

        if abis.iter().any(|abi| abi.os_flavor == OsFlavor::Unknown) {
            if let Some(banner) = self.banner(library) {
                for abi in &mut abis {
                    banner.refine(abi);
                }
            }
        }
        abis
    }

    /// Memoized banner scan.
    pub fn banner(&self, library: &Utf8Path) -> Option<BuildBanner> {
        if let Ok(cache) = self.banners.lock() {
            if let Some(cached) = cache.get(library) {
                return cached.clone();
            }
        }

        self.metrics.record_banner_scan();
        let banner = match banner::scan_file(library) {
            Ok(banner) => banner,
            Err(e) => {
                tracing::debug!("Banner scan of {} failed: {}", library, e);
                None
            }
        };

        if let Ok(mut cache) = self.banners.lock() {
            cache.insert(library.to_path_buf(), banner.clone());
        }
        banner
    }

    pub fn clear_banner_cache(&self) {
        if let Ok(mut cache) = self.banners.lock() {
            cache.clear();
        }
    }
}
