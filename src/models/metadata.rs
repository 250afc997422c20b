use crate::models::query::{PropertyVariant, RawQueryResult};
use crate::models::version_number::VersionNumber;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Schema version of [`InstallationMetadata`] records in the on-disk cache.
///
/// Bump whenever a field is added or its derivation changes; cached records with
/// a lower version are discarded and the installation is queried again.
pub const METADATA_SCHEMA_VERSION: u32 = 3;

/// Default build flavor configured in the installation's `qconfig.pri`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildConfig {
    Debug,
    #[default]
    Release,
    DebugAndRelease,
}

/// Everything derived from querying one installation.
///
/// All paths are empty until the first successful resolution; resolution is
/// memoized through `version_info_up_to_date`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationMetadata {
    pub tool_path: Utf8PathBuf,

    pub prefix: Utf8PathBuf,
    pub source: Utf8PathBuf,
    pub bin: Utf8PathBuf,
    pub libexec: Utf8PathBuf,
    pub configuration: Utf8PathBuf,
    pub arch_data: Utf8PathBuf,
    pub data: Utf8PathBuf,
    pub demos: Utf8PathBuf,
    pub docs: Utf8PathBuf,
    pub examples: Utf8PathBuf,
    pub headers: Utf8PathBuf,
    pub imports: Utf8PathBuf,
    pub library: Utf8PathBuf,
    pub plugins: Utf8PathBuf,
    pub qml: Utf8PathBuf,
    pub translations: Utf8PathBuf,

    pub host_bin: Utf8PathBuf,
    pub host_libexec: Utf8PathBuf,
    pub host_data: Utf8PathBuf,
    pub host_prefix: Utf8PathBuf,

    pub installed: bool,
    pub has_examples: bool,
    pub has_demos: bool,
    pub has_documentation: bool,
    pub tool_is_executable: bool,
    pub version_info_up_to_date: bool,

    pub version_string: String,

    // mkspec
    pub mkspec: String,
    pub mkspec_path: Utf8PathBuf,
    pub default_build_config: BuildConfig,
    pub framework_build: bool,
    pub is_cross_build: bool,
    pub config_values: Vec<String>,
    pub qt_config_values: Vec<String>,
    pub platforms: Vec<String>,
    pub is_qnx: bool,

    /// Why the last query failed, if it did.
    pub query_error: Option<String>,

    pub raw_query_result: RawQueryResult,
}

impl InstallationMetadata {
    pub fn new(tool_path: Utf8PathBuf) -> Self {
        Self {
            tool_path,
            ..Self::default()
        }
    }

    pub fn version(&self) -> VersionNumber {
        VersionNumber::parse(&self.version_string).unwrap_or_default()
    }

    /// Any query property not promoted to a named field.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.raw_query_result.value(name, PropertyVariant::Get)
    }

    /// Metadata describing an installation whose tool could not be queried.
    pub fn failed(tool_path: Utf8PathBuf, reason: impl Into<String>) -> Self {
        Self {
            tool_path,
            tool_is_executable: false,
            version_info_up_to_date: true,
            query_error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.version_info_up_to_date && self.query_error.is_none()
    }
}
