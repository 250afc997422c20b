use crate::models::abi::Abi;
use crate::models::toolchain::{Environment, Toolchain};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Current version of the settings documents written by this crate.
pub const SETTINGS_FILE_VERSION: i32 = 1;

/// Reserved detection-source prefix for installer-managed entries.
pub const INSTALLER_SOURCE_PREFIX: &str = "SDK.";

/// Detection source of the entry seeded from the PATH scan.
pub const PATH_SOURCE: &str = "PATH";

/// Engine configuration, layered from defaults, `qtversions.yaml` and
/// `QTVERSIONS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_installer_debounce_ms")]
    pub installer_debounce_ms: u64,

    /// Overrides `<config_dir>/installer/qtversion.yaml`.
    #[serde(default)]
    pub installer_settings_path: Option<String>,

    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default)]
    pub toolchains: Vec<ToolchainConfig>,
}

/// Toolchain entry as written in `qtversions.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    pub name: String,
    pub abi: Abi,
    #[serde(default)]
    pub environment: Environment,
}

impl From<ToolchainConfig> for Toolchain {
    fn from(config: ToolchainConfig) -> Self {
        Toolchain {
            name: config.name,
            target_abi: config.abi,
            environment: config.environment,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
            installer_debounce_ms: default_installer_debounce_ms(),
            installer_settings_path: None,
            debug_mode: false,
            log_dir: default_log_dir(),
            toolchains: Vec::new(),
        }
    }
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_installer_debounce_ms() -> u64 {
    2000
}

fn default_log_dir() -> String {
    "logs".to_string()
}

/// One persisted installation record.
///
/// Keys the crate does not understand are kept in `extra` so subtype-specific
/// fields survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Type")]
    pub type_tag: String,

    #[serde(rename = "QMakePath")]
    pub tool_path: String,

    #[serde(rename = "IsAutodetected", default)]
    pub is_autodetected: bool,

    #[serde(rename = "AutodetectionSource", default)]
    pub detection_source: String,

    #[serde(rename = "OverrideFeatures", default, skip_serializing_if = "Option::is_none")]
    pub override_features: Option<Vec<String>>,

    /// Only explicitly set ABIs are persisted.
    #[serde(rename = "Abis", default, skip_serializing_if = "Option::is_none")]
    pub abis: Option<Vec<Abi>>,

    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml_ng::Value>,
}

/// User or installer settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSettingsFile {
    #[serde(rename = "FileVersion")]
    pub file_version: i32,

    /// Records that fail to deserialize are skipped one by one, so a single
    /// bad entry never costs the rest of the document.
    #[serde(rename = "Versions", default, deserialize_with = "deserialize_records")]
    pub versions: Vec<VersionRecord>,
}

fn deserialize_records<'de, D>(deserializer: D) -> Result<Vec<VersionRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_yaml_ng::Value>>::deserialize(deserializer)?.unwrap_or_default();
    let records = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_yaml_ng::from_value::<VersionRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping unreadable version record #{}: {}", index, e);
                None
            }
        })
        .collect();
    Ok(records)
}

impl VersionSettingsFile {
    pub fn new(versions: Vec<VersionRecord>) -> Self {
        Self {
            file_version: SETTINGS_FILE_VERSION,
            versions,
        }
    }

    /// Documents with `FileVersion < 1` are treated as absent.
    pub fn is_readable(&self) -> bool {
        self.file_version >= 1
    }
}

impl Default for VersionSettingsFile {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Prefix installer sources with the reserved tag unless they already carry it.
pub fn installer_source(raw: &str) -> String {
    if raw.starts_with(INSTALLER_SOURCE_PREFIX) {
        raw.to_string()
    } else {
        format!("{INSTALLER_SOURCE_PREFIX}{raw}")
    }
}
