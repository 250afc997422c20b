use crate::metrics::Metrics;
use crate::models::metadata::METADATA_SCHEMA_VERSION;
use crate::models::{Environment, InstallationMetadata, PropertyVariant, QtVersion, RawQueryResult};
use crate::services::abi::AbiExtractor;
use crate::services::mkspec;
use crate::services::query_parser::parse_query_output;
use crate::services::query_tool::{QueryError, QueryToolInvoker};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One cached resolution, tagged with the schema it was written with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub metadata: InstallationMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    entries: IndexMap<String, serde_yaml_ng::Value>,
}

/// On-disk metadata cache keyed by tool path.
///
/// Entries written with an older [`METADATA_SCHEMA_VERSION`] are dropped on
/// load, which forces the installation to be queried again.
#[derive(Debug)]
pub struct MetadataCache {
    path: Option<Utf8PathBuf>,
    entries: Mutex<IndexMap<String, CacheEntry>>,
}

impl MetadataCache {
    /// Cache that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Load the cache file. A missing or unreadable file gives an empty cache.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Discarding metadata cache {}: {:#}", path, e);
                IndexMap::new()
            }
        };
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    fn load_entries(path: &Utf8Path) -> Result<IndexMap<String, CacheEntry>> {
        if !path.exists() {
            return Ok(IndexMap::new());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metadata cache: {}", path))?;
        let document: CacheDocument = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Failed to parse metadata cache: {}", path))?;

        let mut entries = IndexMap::new();
        for (tool_path, value) in document.entries {
            let stored = value
                .get("version")
                .and_then(serde_yaml_ng::Value::as_u64)
                .unwrap_or(0);
            if stored < u64::from(METADATA_SCHEMA_VERSION) {
                tracing::debug!(
                    "Cached metadata for {} has schema {} < {}, dropping",
                    tool_path,
                    stored,
                    METADATA_SCHEMA_VERSION
                );
                continue;
            }
            match serde_yaml_ng::from_value::<CacheEntry>(value) {
                Ok(entry) => {
                    entries.insert(tool_path, entry);
                }
                Err(e) => tracing::debug!("Dropping unreadable cache entry {}: {}", tool_path, e),
            }
        }

        tracing::info!("Loaded {} cached installation(s) from {}", entries.len(), path);
        Ok(entries)
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn get(&self, tool_path: &Utf8Path) -> Option<InstallationMetadata> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(tool_path.as_str())
            .filter(|entry| entry.version >= METADATA_SCHEMA_VERSION)
            .map(|entry| entry.metadata.clone())
    }

    pub fn contains(&self, tool_path: &Utf8Path) -> bool {
        self.get(tool_path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a resolution and write the file.
    pub fn insert(&self, metadata: InstallationMetadata) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                metadata.tool_path.to_string(),
                CacheEntry {
                    version: METADATA_SCHEMA_VERSION,
                    metadata,
                },
            );
        }
        self.save()
    }

    pub fn remove(&self, tool_path: &Utf8Path) -> Result<()> {
        let removed = self
            .entries
            .lock()
            .map(|mut entries| entries.shift_remove(tool_path.as_str()).is_some())
            .unwrap_or(false);
        if removed { self.save() } else { Ok(()) }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let document = {
            let entries = self
                .entries
                .lock()
                .map_err(|_| anyhow::anyhow!("Metadata cache lock poisoned"))?;
            let mut document = CacheDocument::default();
            for (tool_path, entry) in entries.iter() {
                let value = serde_yaml_ng::to_value(entry)
                    .context("Failed to serialize metadata cache entry")?;
                document.entries.insert(tool_path.clone(), value);
            }
            document
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent))?;
        }
        let yaml = serde_yaml_ng::to_string(&document).context("Failed to serialize metadata cache")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write metadata cache: {}", path))?;

        tracing::debug!("Saved metadata cache to {}", path);
        Ok(())
    }
}

/// Normalize a path printed by the query tool.
fn normalize(value: Option<&str>) -> Utf8PathBuf {
    let Some(value) = value else {
        return Utf8PathBuf::new();
    };
    let value = value.replace('\\', "/");
    let trimmed = if value.len() > 1 {
        value.trim_end_matches('/')
    } else {
        value.as_str()
    };
    Utf8PathBuf::from(trimmed)
}

async fn dir_exists(path: &Utf8Path) -> bool {
    if path.as_str().is_empty() {
        return false;
    }
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_dir())
}

/// Builds [`InstallationMetadata`] from the query tool, with the on-disk cache in front.
pub struct MetadataResolver {
    invoker: QueryToolInvoker,
    cache: Arc<MetadataCache>,
    metrics: Arc<Metrics>,
}

impl MetadataResolver {
    pub fn new(invoker: QueryToolInvoker, cache: Arc<MetadataCache>, metrics: Arc<Metrics>) -> Self {
        Self {
            invoker,
            cache,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn invoker(&self) -> &QueryToolInvoker {
        &self.invoker
    }

    /// Resolve metadata for a tool. Cache hits never spawn the tool.
    pub async fn resolve(
        &self,
        tool_path: &Utf8Path,
        environment: &Environment,
    ) -> Result<InstallationMetadata, QueryError> {
        if let Some(cached) = self.cache.get(tool_path) {
            self.metrics.record_cache_hit();
            tracing::debug!("Metadata cache hit for {}", tool_path);
            return Ok(cached);
        }
        self.metrics.record_cache_miss();

        let start = Instant::now();
        let output = self.invoker.query(tool_path, environment).await?;
        let raw = parse_query_output(&output);
        let metadata = Self::from_query_result(tool_path, raw).await;
        self.metrics.record_resolve_time(start.elapsed());

        if metadata.succeeded() {
            if let Err(e) = self.cache.insert(metadata.clone()) {
                tracing::warn!("Failed to persist metadata for {}: {:#}", tool_path, e);
            }
        }
        Ok(metadata)
    }

    /// Derive all named fields from a parsed query result.
    ///
    /// Reads the mkspec and checks the flag-bearing directories, but never
    /// runs the tool.
    pub async fn from_query_result(tool_path: &Utf8Path, raw: RawQueryResult) -> InstallationMetadata {
        let get = |name: &str| normalize(raw.value(name, PropertyVariant::Get));

        let mut metadata = InstallationMetadata::new(tool_path.to_path_buf());
        metadata.prefix = get("QT_INSTALL_PREFIX");
        metadata.source = normalize(raw.value("QT_INSTALL_PREFIX", PropertyVariant::Src));
        metadata.bin = get("QT_INSTALL_BINS");
        metadata.libexec = get("QT_INSTALL_LIBEXECS");
        metadata.configuration = get("QT_INSTALL_CONFIGURATION");
        metadata.arch_data = get("QT_INSTALL_ARCHDATA");
        metadata.data = get("QT_INSTALL_DATA");
        metadata.demos = get("QT_INSTALL_DEMOS");
        metadata.docs = get("QT_INSTALL_DOCS");
        metadata.examples = get("QT_INSTALL_EXAMPLES");
        metadata.headers = get("QT_INSTALL_HEADERS");
        metadata.imports = get("QT_INSTALL_IMPORTS");
        metadata.library = get("QT_INSTALL_LIBS");
        metadata.plugins = get("QT_INSTALL_PLUGINS");
        metadata.qml = get("QT_INSTALL_QML");
        metadata.translations = get("QT_INSTALL_TRANSLATIONS");

        let or = |host: Utf8PathBuf, target: &Utf8PathBuf| {
            if host.as_str().is_empty() { target.clone() } else { host }
        };
        metadata.host_bin = or(get("QT_HOST_BINS"), &metadata.bin);
        metadata.host_libexec = or(get("QT_HOST_LIBEXECS"), &metadata.libexec);
        metadata.host_data = or(get("QT_HOST_DATA"), &metadata.arch_data);
        metadata.host_prefix = or(get("QT_HOST_PREFIX"), &metadata.prefix);

        metadata.version_string = raw.get("QT_VERSION").to_string();

        let (host_bin, headers, docs, examples, demos) = tokio::join!(
            dir_exists(&metadata.host_bin),
            dir_exists(&metadata.headers),
            dir_exists(&metadata.docs),
            dir_exists(&metadata.examples),
            dir_exists(&metadata.demos),
        );
        metadata.installed = host_bin && (cfg!(target_os = "macos") || headers);
        metadata.has_documentation = docs;
        metadata.has_examples = examples;
        metadata.has_demos = demos;

        let spec_raw = raw.clone();
        let spec = tokio::task::spawn_blocking(move || mkspec::read_mkspec(&spec_raw))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("mkspec evaluation task failed: {}", e);
                None
            });
        match spec {
            Some(spec) => {
                metadata.mkspec = spec.name;
                metadata.mkspec_path = spec.path;
                metadata.default_build_config = spec.default_build_config;
                metadata.framework_build = spec.framework_build;
                metadata.is_cross_build = spec.is_cross_build;
                metadata.config_values = spec.config_values;
                metadata.qt_config_values = spec.qt_config_values;
                metadata.platforms = spec.platforms;
                metadata.is_qnx = spec.is_qnx;
            }
            None => tracing::debug!("No usable mkspec for {}", tool_path),
        }

        if metadata.version_string.is_empty() {
            metadata.query_error = Some("Could not determine the Qt version".to_string());
        }

        metadata.tool_is_executable = true;
        metadata.version_info_up_to_date = true;
        metadata.raw_query_result = raw;
        metadata
    }
}

/// Completes a [`QtVersion`]: metadata first, then ABIs. Both steps are
/// memoized on the version itself.
pub struct VersionResolver {
    metadata: MetadataResolver,
    abis: Arc<AbiExtractor>,
}

impl VersionResolver {
    pub fn new(metadata: MetadataResolver, abis: Arc<AbiExtractor>) -> Self {
        Self { metadata, abis }
    }

    pub fn metadata_resolver(&self) -> &MetadataResolver {
        &self.metadata
    }

    pub fn abi_extractor(&self) -> &Arc<AbiExtractor> {
        &self.abis
    }

    /// Fill in metadata unless it is already up to date. Query failures end up
    /// in the metadata as the version's invalid reason.
    pub async fn ensure_metadata(&self, version: &mut QtVersion) {
        if version.metadata().version_info_up_to_date {
            return;
        }
        let tool_path = version.tool_path().to_path_buf();
        let metadata = match self.metadata.resolve(&tool_path, &Environment::new()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Could not query {}: {}", tool_path, e);
                InstallationMetadata::failed(tool_path, e.to_string())
            }
        };
        version.set_metadata(metadata);
    }

    /// Infer ABIs unless they are known or explicitly set.
    pub async fn ensure_abis(&self, version: &mut QtVersion) {
        if version.qt_abis().is_some() {
            return;
        }
        self.ensure_metadata(version).await;

        let metadata = version.metadata().clone();
        if !metadata.succeeded() {
            version.set_inferred_abis(Vec::new());
            return;
        }

        let extractor = self.abis.clone();
        let abis = tokio::task::spawn_blocking(move || extractor.infer_for(&metadata))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("ABI inference task failed: {}", e);
                Vec::new()
            });
        version.set_inferred_abis(abis);
    }

    pub async fn resolve(&self, version: &mut QtVersion) {
        self.ensure_metadata(version).await;
        self.ensure_abis(version).await;
    }

    /// Forget what is known about `version`, including its on-disk cache entry,
    /// so the next resolution runs the tool again.
    pub fn reset_cache(&self, version: &mut QtVersion) {
        if let Err(e) = self.metadata.cache().remove(version.tool_path()) {
            tracing::warn!("Failed to drop cached metadata for {}: {:#}", version.tool_path(), e);
        }
        version.reset_cache();
    }
}
