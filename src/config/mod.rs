use crate::models::{EngineConfig, VersionSettingsFile};
use crate::services::MetadataCache;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Engine configuration file, optional.
pub const ENGINE_CONFIG_FILE: &str = "qtversions.yaml";

/// User settings document holding every registered version.
pub const USER_SETTINGS_FILE: &str = "qtversion.yaml";

/// On-disk metadata cache keyed by tool path.
pub const METADATA_CACHE_FILE: &str = "qtversion-cache.yaml";

/// Prefix of environment variables overriding engine configuration.
pub const ENV_PREFIX: &str = "QTVERSIONS";

/// Configuration manager for the engine configuration and the YAML settings files.
///
/// Owns the file locations:
/// - Engine config (`qtversions.yaml`): timeouts, debounce, toolchains
/// - User settings (`qtversion.yaml`): the persisted registry
/// - Installer settings (`installer/qtversion.yaml` unless configured): written by SDK installers
/// - Metadata cache (`qtversion-cache.yaml`)
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    engine_config_path: Utf8PathBuf,
    user_settings_path: Utf8PathBuf,
    installer_settings_path: Utf8PathBuf,
    metadata_cache_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory holding the settings files, created if missing
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            engine_config_path: config_dir.join(ENGINE_CONFIG_FILE),
            user_settings_path: config_dir.join(USER_SETTINGS_FILE),
            installer_settings_path: config_dir.join("installer").join(USER_SETTINGS_FILE),
            metadata_cache_path: config_dir.join(METADATA_CACHE_FILE),
            config_dir,
        })
    }

    /// Load the engine configuration: built-in defaults, then `qtversions.yaml`,
    /// then `QTVERSIONS_*` environment variables.
    pub fn load_engine_config(&self) -> Result<EngineConfig> {
        self.load_engine_config_from(None)
    }

    /// Same as [`load_engine_config`](Self::load_engine_config) with an explicit
    /// environment instead of the process one.
    pub fn load_engine_config_from(
        &self,
        environment: Option<config::Map<String, String>>,
    ) -> Result<EngineConfig> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.engine_config_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(environment),
            )
            .build()
            .with_context(|| format!("Failed to read engine config: {}", self.engine_config_path))?;

        let config: EngineConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse engine config: {}", self.engine_config_path))?;

        tracing::info!(
            "Loaded engine config (timeout {}s, {} toolchain(s))",
            config.query_timeout_secs,
            config.toolchains.len()
        );
        Ok(config)
    }

    /// Take the installer settings location from `config` when it names one.
    pub fn apply_engine_config(&mut self, config: &EngineConfig) {
        if let Some(path) = &config.installer_settings_path {
            self.installer_settings_path = Utf8PathBuf::from(path);
        }
    }

    /// Save the engine configuration file.
    pub fn save_engine_config(&self, config: &EngineConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize engine config to YAML")?;

        fs::write(&self.engine_config_path, yaml_string).with_context(|| {
            format!("Failed to write engine config: {}", self.engine_config_path)
        })?;

        tracing::info!("Saved engine config to {}", self.engine_config_path);
        Ok(())
    }

    /// Load the user settings document.
    ///
    /// # Returns
    /// `None` if the file is missing, unparsable or has `FileVersion < 1`
    pub fn load_user_settings(&self) -> Result<Option<VersionSettingsFile>> {
        load_settings(&self.user_settings_path, "user settings")
    }

    /// Save the user settings document, replacing the whole file.
    pub fn save_user_settings(&self, settings: &VersionSettingsFile) -> Result<()> {
        save_settings(&self.user_settings_path, settings, "user settings")
    }

    /// Load the installer-managed settings document. Same rules as the user settings.
    pub fn load_installer_settings(&self) -> Result<Option<VersionSettingsFile>> {
        load_settings(&self.installer_settings_path, "installer settings")
    }

    /// Write the installer settings document. Installers normally own this file.
    pub fn save_installer_settings(&self, settings: &VersionSettingsFile) -> Result<()> {
        save_settings(&self.installer_settings_path, settings, "installer settings")
    }

    /// Open the metadata cache stored next to the settings.
    pub fn open_metadata_cache(&self) -> MetadataCache {
        MetadataCache::open(self.metadata_cache_path.clone())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn engine_config_path(&self) -> &Utf8Path {
        &self.engine_config_path
    }

    pub fn user_settings_path(&self) -> &Utf8Path {
        &self.user_settings_path
    }

    pub fn installer_settings_path(&self) -> &Utf8Path {
        &self.installer_settings_path
    }

    pub fn metadata_cache_path(&self) -> &Utf8Path {
        &self.metadata_cache_path
    }
}

fn load_settings(path: &Utf8Path, what: &str) -> Result<Option<VersionSettingsFile>> {
    if !path.exists() {
        tracing::warn!("No {} file at {}", what, path);
        return Ok(None);
    }

    let file_contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}: {}", what, path))?;

    let settings: VersionSettingsFile = match serde_yaml_ng::from_str(&file_contents) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Ignoring unparsable {} {}: {}", what, path, e);
            return Ok(None);
        }
    };

    if !settings.is_readable() {
        tracing::warn!(
            "Ignoring {} {} with FileVersion {}",
            what,
            path,
            settings.file_version
        );
        return Ok(None);
    }

    tracing::info!("Loaded {} record(s) from {} {}", settings.versions.len(), what, path);
    Ok(Some(settings))
}

fn save_settings(path: &Utf8Path, settings: &VersionSettingsFile, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory for {}: {}", what, parent))?;
    }

    let yaml_string = serde_yaml_ng::to_string(settings)
        .with_context(|| format!("Failed to serialize {} to YAML", what))?;

    fs::write(path, yaml_string).with_context(|| format!("Failed to write {}: {}", what, path))?;

    tracing::debug!("Saved {} to {}", what, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VersionRecord;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    fn record(id: i32) -> VersionRecord {
        VersionRecord {
            id: Some(id),
            name: "Qt %{Qt:Version} (System)".to_string(),
            type_tag: "Qt4ProjectManager.QtVersion.Desktop".to_string(),
            tool_path: "/usr/bin/qmake6".to_string(),
            is_autodetected: true,
            detection_source: "PATH".to_string(),
            override_features: None,
            abis: None,
            extra: IndexMap::new(),
        }
    }

    #[test]
    fn test_default_locations() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.user_settings_path().ends_with("qtversion.yaml"));
        assert!(manager.metadata_cache_path().ends_with("qtversion-cache.yaml"));
        assert!(
            manager
                .installer_settings_path()
                .ends_with("installer/qtversion.yaml")
        );
    }

    #[test]
    fn test_load_save_user_settings() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.load_user_settings().unwrap().is_none());

        let settings = VersionSettingsFile::new(vec![record(3)]);
        manager.save_user_settings(&settings).unwrap();

        let loaded = manager.load_user_settings().unwrap().unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_old_file_version_is_absent() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.user_settings_path(), "FileVersion: 0\nVersions: []\n").unwrap();
        assert!(manager.load_user_settings().unwrap().is_none());

        fs::write(manager.user_settings_path(), "{ not yaml: [").unwrap();
        assert!(manager.load_user_settings().unwrap().is_none());
    }

    #[test]
    fn test_engine_config_layers() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert_eq!(manager.load_engine_config_from(Some(config::Map::new())).unwrap(), EngineConfig::default());

        fs::write(
            manager.engine_config_path(),
            "query_timeout_secs: 10\ntoolchains:\n  - name: gcc\n    abi: x86-linux-generic-elf-64bit\n",
        )
        .unwrap();
        let mut env = config::Map::new();
        env.insert("QTVERSIONS_QUERY_TIMEOUT_SECS".to_string(), "5".to_string());
        env.insert("QTVERSIONS_DEBUG_MODE".to_string(), "true".to_string());

        let config = manager.load_engine_config_from(Some(env)).unwrap();
        assert_eq!(config.query_timeout_secs, 5);
        assert!(config.debug_mode);
        assert_eq!(config.toolchains.len(), 1);
        assert_eq!(config.installer_debounce_ms, 2000);
    }

    #[test]
    fn test_installer_path_override() {
        let (mut manager, temp_dir) = create_test_config_manager();
        let custom = temp_dir.path().join("sdk/qtversion.yaml");
        let config = EngineConfig {
            installer_settings_path: Some(custom.to_str().unwrap().to_string()),
            ..EngineConfig::default()
        };
        manager.apply_engine_config(&config);
        assert_eq!(manager.installer_settings_path().as_std_path(), custom);
    }
}
