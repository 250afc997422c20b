// Registry state module
//
// This module provides the VersionRegistry which owns every known QtVersion behind
// Arc<RwLock<T>> and emits change events for kits and other consumers.

pub mod diff;

pub use diff::{VersionDiff, diff_versions};

use crate::config::ConfigManager;
use crate::metrics::Metrics;
use crate::models::config::{INSTALLER_SOURCE_PREFIX, PATH_SOURCE, installer_source};
use crate::models::{
    EngineConfig, NO_VERSION_ID, QtVersion, Toolchain, VersionRecord, VersionSettingsFile,
};
use crate::services::{
    AbiExtractor, InstallerWatcher, MetadataResolver, PathScanner, ProcessRunner, QueryToolInvoker,
    VersionFactory, VersionResolver,
};
use camino::Utf8Path;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

/// Lifecycle of the registry.
///
/// `Uninitialized → Loading → Ready → ShuttingDown → Uninitialized`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    Uninitialized,
    Loading,
    Ready,
    ShuttingDown,
}

/// Change events emitted by the registry
///
/// After loading, subscribers get one [`VersionsLoaded`](Self::VersionsLoaded)
/// followed by one [`VersionsChanged`](Self::VersionsChanged) listing every id as added.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    /// Initial load has finished
    VersionsLoaded,

    /// Ids are disjoint across the three lists
    VersionsChanged {
        added: Vec<i32>,
        removed: Vec<i32>,
        changed: Vec<i32>,
    },
}

impl From<VersionDiff> for RegistryEvent {
    fn from(diff: VersionDiff) -> Self {
        RegistryEvent::VersionsChanged {
            added: diff.added,
            removed: diff.removed,
            changed: diff.changed,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("The version registry has not finished loading")]
    NotLoaded,

    #[error("Id {NO_VERSION_ID} is reserved and cannot be stored")]
    SentinelId,

    #[error("Installer settings list the source '{0}' more than once")]
    DuplicateInstallerSource(String),

    #[error("No Qt version with id {0}")]
    UnknownVersion(i32),

    #[error("Failed to watch installer settings: {0}")]
    Watch(String),
}

#[derive(Debug)]
struct RegistryState {
    phase: RegistryPhase,
    versions: BTreeMap<i32, QtVersion>,
    next_id: i32,
}

impl RegistryState {
    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bump_next_id(&mut self) {
        if let Some(max) = self.versions.keys().next_back() {
            self.next_id = self.next_id.max(max + 1);
        }
    }

    fn snapshot(&self) -> Vec<QtVersion> {
        self.versions.values().cloned().collect()
    }
}

struct InstallerWatch {
    _watcher: InstallerWatcher,
    task: JoinHandle<()>,
}

/// Owner of all registered Qt versions
///
/// This is the central component that:
/// - Loads versions from the user settings, merges the installer settings and
///   falls back to a `PATH` scan on first start
/// - Applies mutations (`add`, `remove`, `remove_many`, `replace_all`) and persists
///   the full set after each one
/// - Emits one [`RegistryEvent`] per mutation via a tokio broadcast channel
/// - Re-merges the installer settings when the file changes
///
/// All mutation goes through the write lock, so there is never more than one writer.
/// Querying tools and scanning binaries happen outside the lock; see
/// [`resolve_all`](Self::resolve_all).
///
/// # Related Types
///
/// - [`crate::services::VersionFactory`]: Builds versions from records and tool paths
/// - [`crate::config::ConfigManager`]: Settings file locations and I/O
/// - [`crate::kit::KitAspect`]: Consumer that repairs kit references on events
pub struct VersionRegistry {
    state: Arc<RwLock<RegistryState>>,

    /// Multiple subscribers can listen for changes
    events_tx: broadcast::Sender<RegistryEvent>,

    factory: Arc<VersionFactory>,
    config: ConfigManager,
    path_scanner: PathScanner,
    installer_debounce: Duration,
    watch: Mutex<Option<InstallerWatch>>,
    metrics: Arc<Metrics>,
}

impl VersionRegistry {
    /// Create an unloaded registry with a broadcast buffer of 100 events
    pub fn new(
        config: ConfigManager,
        factory: Arc<VersionFactory>,
        path_scanner: PathScanner,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                phase: RegistryPhase::Uninitialized,
                versions: BTreeMap::new(),
                next_id: 0,
            })),
            events_tx,
            factory,
            config,
            path_scanner,
            installer_debounce: Duration::from_millis(2000),
            watch: Mutex::new(None),
            metrics,
        }
    }

    /// Wire the whole resolution stack from configuration.
    ///
    /// The metadata cache lives next to the user settings; `runner` spawns the
    /// query tools (a [`TokioProcessRunner`](crate::services::TokioProcessRunner) outside tests).
    pub fn build(
        config: ConfigManager,
        engine: &EngineConfig,
        runner: Arc<dyn ProcessRunner>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let timeout = Duration::from_secs(engine.query_timeout_secs);
        let invoker = QueryToolInvoker::new(runner.clone(), timeout, metrics.clone());
        invoker.set_toolchains(engine.toolchains.iter().cloned().map(Toolchain::from).collect());

        let cache = Arc::new(config.open_metadata_cache());
        let metadata = MetadataResolver::new(invoker, cache, metrics.clone());
        let abis = Arc::new(AbiExtractor::new(metrics.clone()));
        let factory = Arc::new(VersionFactory::new(Arc::new(VersionResolver::new(metadata, abis))));
        let path_scanner = PathScanner::new(runner, timeout);

        Self::new(config, factory, path_scanner, metrics)
            .with_installer_debounce(Duration::from_millis(engine.installer_debounce_ms))
    }

    /// Replace the scanner used to seed an empty registry.
    pub fn with_path_scanner(mut self, path_scanner: PathScanner) -> Self {
        self.path_scanner = path_scanner;
        self
    }

    pub fn with_installer_debounce(mut self, debounce: Duration) -> Self {
        self.installer_debounce = debounce;
        self
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events_tx.subscribe()
    }

    pub fn phase(&self) -> RegistryPhase {
        self.read().phase
    }

    pub fn is_loaded(&self) -> bool {
        self.phase() == RegistryPhase::Ready
    }

    pub fn factory(&self) -> &Arc<VersionFactory> {
        &self.factory
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    /// Toolchains are known: hand their environments to the query tool and run
    /// the initial load if it has not happened yet.
    pub async fn on_toolchains_loaded(&self, toolchains: Vec<Toolchain>) -> Result<(), RegistryError> {
        tracing::debug!("{} toolchain(s) available for query retries", toolchains.len());
        self.factory
            .resolver()
            .metadata_resolver()
            .invoker()
            .set_toolchains(toolchains);

        if self.phase() == RegistryPhase::Uninitialized {
            self.load().await
        } else {
            Ok(())
        }
    }

    /// Initial load: user settings, then installer settings.
    ///
    /// When the user settings are missing or unreadable, a tool found on `PATH`
    /// seeds the registry instead. Runs once; later calls are ignored.
    pub async fn load(&self) -> Result<(), RegistryError> {
        {
            let mut state = self.write();
            if state.phase != RegistryPhase::Uninitialized {
                tracing::debug!("Registry load requested in phase {:?}, ignoring", state.phase);
                return Ok(());
            }
            state.phase = RegistryPhase::Loading;
        }

        let settings = match self.config.load_user_settings() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Could not read user settings: {:#}", e);
                None
            }
        };
        let had_settings = settings.is_some();

        let mut versions = match settings {
            Some(settings) => self.restore_records(&settings.versions),
            None => BTreeMap::new(),
        };
        let mut next_id = versions.keys().next_back().map_or(0, |max| max + 1);

        if !had_settings {
            if let Some(tool) = self.path_scanner.find_tool().await {
                match self
                    .factory
                    .create_from_tool_path(&tool, true, PATH_SOURCE, next_id)
                    .await
                {
                    Ok(version) => {
                        versions.insert(next_id, version);
                        next_id += 1;
                    }
                    Err(e) => tracing::warn!("Could not register {} from PATH: {}", tool, e),
                }
            }
        }

        if let Some(installer) = self.read_installer_settings() {
            versions = self.merge_installer_records(&versions, &installer.versions, &mut next_id);
        }

        let added: Vec<i32> = versions.keys().copied().collect();
        {
            let mut state = self.write();
            state.versions = versions;
            state.next_id = next_id;
            state.bump_next_id();
            state.phase = RegistryPhase::Ready;
            if had_settings || !state.versions.is_empty() {
                self.persist(&state.versions);
            }
        }

        tracing::info!("Version registry loaded with {} version(s)", added.len());
        self.emit(RegistryEvent::VersionsLoaded);
        self.emit(RegistryEvent::VersionsChanged {
            added,
            removed: Vec::new(),
            changed: Vec::new(),
        });
        Ok(())
    }

    /// Rebuild versions from stored records. Stored ids are kept when usable,
    /// records without one get fresh ids after the highest stored id.
    fn restore_records(&self, records: &[VersionRecord]) -> BTreeMap<i32, QtVersion> {
        let stored: HashSet<i32> = records
            .iter()
            .filter_map(|record| record.id)
            .filter(|id| *id >= 0)
            .collect();
        let mut next_id = stored.iter().max().map_or(0, |max| max + 1);

        let mut versions = BTreeMap::new();
        for record in records {
            let id = match record.id {
                Some(id) if id >= 0 && !versions.contains_key(&id) => id,
                _ => {
                    let id = next_id;
                    next_id += 1;
                    id
                }
            };
            match self.factory.create_from_record(id, record) {
                Ok(version) => {
                    versions.insert(id, version);
                }
                Err(e) => tracing::warn!("Skipping stored version {}: {}", record.tool_path, e),
            }
        }
        versions
    }

    fn read_installer_settings(&self) -> Option<VersionSettingsFile> {
        match self.config.load_installer_settings() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Could not read installer settings: {:#}", e);
                None
            }
        }
    }

    /// Merge installer records into `current` by detection source.
    ///
    /// Matching entries keep their id. Installer entries whose source is gone
    /// from `records` are dropped. Duplicate sources: the first record wins.
    fn merge_installer_records(
        &self,
        current: &BTreeMap<i32, QtVersion>,
        records: &[VersionRecord],
        next_id: &mut i32,
    ) -> BTreeMap<i32, QtVersion> {
        let mut merged = current.clone();
        let mut sources: HashSet<String> = HashSet::new();

        for record in records {
            if record.detection_source.is_empty() {
                tracing::warn!("Installer record for {} has no AutodetectionSource", record.tool_path);
                continue;
            }
            let source = installer_source(&record.detection_source);
            if !sources.insert(source.clone()) {
                tracing::error!("{}", RegistryError::DuplicateInstallerSource(source));
                continue;
            }

            let existing = merged
                .values()
                .find(|version| version.detection_source() == source)
                .map(QtVersion::unique_id);
            let id = existing.unwrap_or(*next_id);

            let mut candidate = match self.factory.create_from_record(id, record) {
                Ok(version) => version,
                Err(e) => {
                    tracing::warn!("Skipping installer record {}: {}", source, e);
                    continue;
                }
            };
            candidate.set_detection(true, source.as_str());

            let unchanged = match merged.get(&id) {
                Some(old) if old.is_equivalent_to(&candidate) => true,
                Some(old) => {
                    if old.tool_path() == candidate.tool_path() {
                        candidate.set_metadata(old.metadata().clone());
                    }
                    false
                }
                None => false,
            };
            if unchanged {
                continue;
            }
            if existing.is_none() {
                *next_id += 1;
            }
            tracing::debug!("Installer source {} -> id {}", source, id);
            merged.insert(id, candidate);
        }

        merged.retain(|_, version| {
            let source = version.detection_source();
            let keep = !source.starts_with(INSTALLER_SOURCE_PREFIX) || sources.contains(source);
            if !keep {
                tracing::info!("Installer no longer provides {}, removing it", source);
            }
            keep
        });
        merged
    }

    /// Re-read the installer settings and apply only what changed.
    ///
    /// A missing installer file changes nothing.
    pub fn remerge_installer(&self) -> Result<VersionDiff, RegistryError> {
        let Some(installer) = self.read_installer_settings() else {
            tracing::debug!("No installer settings to merge");
            return Ok(VersionDiff::default());
        };

        let diff = {
            let mut state = self.write();
            if state.phase != RegistryPhase::Ready {
                return Err(RegistryError::NotLoaded);
            }
            let mut next_id = state.next_id;
            let merged = self.merge_installer_records(&state.versions, &installer.versions, &mut next_id);
            let new_set: Vec<QtVersion> = merged.values().cloned().collect();
            let diff = diff_versions(&state.snapshot(), &new_set);
            if diff.is_empty() {
                return Ok(diff);
            }
            state.versions = merged;
            state.next_id = next_id;
            state.bump_next_id();
            self.persist(&state.versions);
            diff
        };

        tracing::info!(
            "Installer merge: {} added, {} removed, {} changed",
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len()
        );
        self.emit(diff.clone().into());
        Ok(diff)
    }

    /// Start the debounced watch on the installer settings file. Each settled
    /// burst of writes triggers [`remerge_installer`](Self::remerge_installer).
    pub fn watch_installer(self: &Arc<Self>) -> Result<(), RegistryError> {
        let (tx, mut rx) = mpsc::channel(4);
        let watcher = InstallerWatcher::spawn(
            self.config.installer_settings_path().to_path_buf(),
            self.installer_debounce,
            tx,
        )
        .map_err(|e| RegistryError::Watch(e.to_string()))?;

        let registry = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                // Reads the settings file and persists, so keep it off the runtime
                match tokio::task::spawn_blocking(move || registry.remerge_installer()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!("Installer re-merge failed: {}", e),
                    Err(e) => tracing::warn!("Installer re-merge task failed: {}", e),
                }
            }
        });

        *self.watch_slot() = Some(InstallerWatch {
            _watcher: watcher,
            task,
        });
        Ok(())
    }

    /// Snapshot of all versions, ordered by id.
    ///
    /// Calling this before loading has finished is a programming error.
    pub fn versions(&self) -> Vec<QtVersion> {
        let state = self.read();
        debug_assert!(
            state.phase == RegistryPhase::Ready,
            "versions() called in phase {:?}",
            state.phase
        );
        if state.phase != RegistryPhase::Ready {
            tracing::error!("versions() called before the registry finished loading");
            return Vec::new();
        }
        state.snapshot()
    }

    pub fn version(&self, unique_id: i32) -> Option<QtVersion> {
        self.read().versions.get(&unique_id).cloned()
    }

    pub fn contains(&self, unique_id: i32) -> bool {
        self.read().versions.contains_key(&unique_id)
    }

    pub fn find_by_tool_path(&self, tool_path: &Utf8Path) -> Option<QtVersion> {
        self.read()
            .versions
            .values()
            .find(|version| version.tool_path() == tool_path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.read().versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve a fresh id for a version about to be added.
    pub fn allocate_id(&self) -> i32 {
        self.write().take_id()
    }

    /// Ids of versions that are not valid, for a "clean up" action.
    pub fn invalid_version_ids(&self) -> Vec<i32> {
        self.read()
            .versions
            .values()
            .filter(|version| !version.is_valid())
            .map(QtVersion::unique_id)
            .collect()
    }

    /// Register a version.
    ///
    /// # Returns
    /// `Ok(false)` when the id is already registered; nothing changes then
    pub fn add(&self, version: QtVersion) -> Result<bool, RegistryError> {
        let id = version.unique_id();
        if id == NO_VERSION_ID {
            tracing::error!("Refusing to add a version with the reserved id {}", NO_VERSION_ID);
            return Err(RegistryError::SentinelId);
        }
        {
            let mut state = self.write_ready()?;
            if state.versions.contains_key(&id) {
                tracing::warn!("Version {} is already registered", id);
                return Ok(false);
            }
            tracing::info!("Adding {} (id {})", version.display_name(), id);
            state.versions.insert(id, version);
            state.bump_next_id();
            self.persist(&state.versions);
        }
        self.emit(RegistryEvent::VersionsChanged {
            added: vec![id],
            removed: Vec::new(),
            changed: Vec::new(),
        });
        Ok(true)
    }

    /// Remove one version and return it.
    pub fn remove(&self, unique_id: i32) -> Result<QtVersion, RegistryError> {
        let removed = {
            let mut state = self.write_ready()?;
            let removed = state
                .versions
                .remove(&unique_id)
                .ok_or(RegistryError::UnknownVersion(unique_id))?;
            self.persist(&state.versions);
            removed
        };
        tracing::info!("Removed {} (id {})", removed.display_name(), unique_id);
        self.emit(RegistryEvent::VersionsChanged {
            added: Vec::new(),
            removed: vec![unique_id],
            changed: Vec::new(),
        });
        Ok(removed)
    }

    /// Remove several versions with a single notification. Unknown ids are skipped.
    ///
    /// # Returns
    /// The ids that were actually removed
    pub fn remove_many(&self, ids: &[i32]) -> Result<Vec<i32>, RegistryError> {
        let removed: Vec<i32> = {
            let mut state = self.write_ready()?;
            let mut removed: Vec<i32> = ids
                .iter()
                .copied()
                .filter(|id| state.versions.remove(id).is_some())
                .collect();
            removed.sort_unstable();
            removed.dedup();
            if !removed.is_empty() {
                self.persist(&state.versions);
            }
            removed
        };
        if !removed.is_empty() {
            tracing::info!("Removed {} version(s)", removed.len());
            self.emit(RegistryEvent::VersionsChanged {
                added: Vec::new(),
                removed: removed.clone(),
                changed: Vec::new(),
            });
        }
        Ok(removed)
    }

    /// Replace the whole set in one transaction.
    ///
    /// The stored set becomes exactly `versions`. Exactly one
    /// [`RegistryEvent::VersionsChanged`] is emitted with the diff against the old set.
    pub fn replace_all(&self, versions: Vec<QtVersion>) -> Result<VersionDiff, RegistryError> {
        if versions.iter().any(|version| version.unique_id() == NO_VERSION_ID) {
            tracing::error!("Refusing to store a version with the reserved id {}", NO_VERSION_ID);
            return Err(RegistryError::SentinelId);
        }

        let diff = {
            let mut state = self.write_ready()?;
            let mut new_versions = BTreeMap::new();
            for version in versions {
                if let Some(previous) = new_versions.insert(version.unique_id(), version) {
                    tracing::warn!("Duplicate id {} in replacement set, keeping the last", previous.unique_id());
                }
            }
            let new_set: Vec<QtVersion> = new_versions.values().cloned().collect();
            let diff = diff_versions(&state.snapshot(), &new_set);
            state.versions = new_versions;
            state.bump_next_id();
            self.persist(&state.versions);
            diff
        };

        tracing::info!(
            "Replaced versions: {} added, {} removed, {} changed",
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len()
        );
        self.emit(diff.clone().into());
        Ok(diff)
    }

    /// Resolve metadata and ABIs of one version and store the result.
    /// No event is emitted.
    pub async fn resolve_version(&self, unique_id: i32) -> Result<QtVersion, RegistryError> {
        let mut version = {
            let state = self.read();
            if state.phase != RegistryPhase::Ready {
                return Err(RegistryError::NotLoaded);
            }
            state
                .versions
                .get(&unique_id)
                .cloned()
                .ok_or(RegistryError::UnknownVersion(unique_id))?
        };
        self.factory.resolver().resolve(&mut version).await;
        self.merge_resolved(vec![version.clone()]);
        Ok(version)
    }

    /// Drop the derived data of one version, in memory and in the metadata
    /// cache. The next resolution queries the tool again. No event is emitted.
    pub fn reset_version(&self, unique_id: i32) -> Result<(), RegistryError> {
        let mut state = self.write_ready()?;
        let version = state
            .versions
            .get_mut(&unique_id)
            .ok_or(RegistryError::UnknownVersion(unique_id))?;
        self.factory.resolver().reset_cache(version);
        tracing::debug!("Reset cached data of version {}", unique_id);
        Ok(())
    }

    /// Resolve every version that still lacks metadata or ABIs, all concurrently.
    ///
    /// # Returns
    /// The number of versions updated
    pub async fn resolve_all(&self) -> Result<usize, RegistryError> {
        let pending: Vec<QtVersion> = {
            let state = self.read();
            if state.phase != RegistryPhase::Ready {
                return Err(RegistryError::NotLoaded);
            }
            state
                .versions
                .values()
                .filter(|v| !v.metadata().version_info_up_to_date || v.qt_abis().is_none())
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let mut tasks = JoinSet::new();
        for mut version in pending {
            let resolver = self.factory.resolver().clone();
            tasks.spawn(async move {
                resolver.resolve(&mut version).await;
                version
            });
        }

        let mut resolved = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(version) => resolved.push(version),
                Err(e) => tracing::warn!("Resolution task failed: {}", e),
            }
        }

        let updated = self.merge_resolved(resolved);
        tracing::info!("Resolved {} version(s) in {:?}", updated, start.elapsed());
        Ok(updated)
    }

    /// Store resolved copies, skipping entries replaced or removed meanwhile.
    fn merge_resolved(&self, resolved: Vec<QtVersion>) -> usize {
        let mut state = self.write();
        let mut updated = 0;
        for version in resolved {
            match state.versions.get_mut(&version.unique_id()) {
                Some(current) if current.is_equivalent_to(&version) => {
                    *current = version;
                    updated += 1;
                }
                _ => tracing::debug!(
                    "Version {} changed during resolution, dropping result",
                    version.unique_id()
                ),
            }
        }
        updated
    }

    /// Stop watching, drop all versions and return to `Uninitialized`.
    pub fn shutdown(&self) {
        {
            let mut state = self.write();
            if state.phase == RegistryPhase::Uninitialized {
                return;
            }
            state.phase = RegistryPhase::ShuttingDown;
        }

        if let Some(watch) = self.watch_slot().take() {
            watch.task.abort();
        }

        let mut state = self.write();
        let released = state.versions.len();
        state.versions.clear();
        state.next_id = 0;
        state.phase = RegistryPhase::Uninitialized;
        tracing::info!("Version registry shut down, released {} version(s)", released);
    }

    /// Write every version to the user settings. Failures are logged only.
    fn persist(&self, versions: &BTreeMap<i32, QtVersion>) {
        let settings = VersionSettingsFile::new(versions.values().map(QtVersion::to_record).collect());
        if let Err(e) = self.config.save_user_settings(&settings) {
            tracing::warn!("Failed to persist Qt versions: {:#}", e);
        }
    }

    fn emit(&self, event: RegistryEvent) {
        self.metrics.record_notification();
        // Nobody listening is fine
        if self.events_tx.send(event).is_err() {
            self.metrics.record_notification_error();
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_ready(&self) -> Result<RwLockWriteGuard<'_, RegistryState>, RegistryError> {
        let state = self.write();
        if state.phase == RegistryPhase::Ready {
            Ok(state)
        } else {
            Err(RegistryError::NotLoaded)
        }
    }

    fn watch_slot(&self) -> MutexGuard<'_, Option<InstallerWatch>> {
        self.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for VersionRegistry {
    fn drop(&mut self) {
        if let Some(watch) = self.watch_slot().take() {
            watch.task.abort();
        }
    }
}
