use crate::models::abi::Abi;
use crate::models::config::VersionRecord;
use crate::models::metadata::InstallationMetadata;
use crate::models::subtype::{DeviceType, Subtype};
use crate::models::version_number::VersionNumber;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Unique id meaning "no version selected". Never stored in the registry.
pub const NO_VERSION_ID: i32 = -1;

static MACRO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{Qt:([A-Za-z0-9_/]+)\}").expect("Invalid macro regex"));

/// Where the ABI list of a version came from.
///
/// Explicit ABIs (installer-supplied or set by the user) are sticky: inference
/// never replaces them and [`QtVersion::reset_cache`] keeps them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AbiState {
    #[default]
    Unknown,
    Inferred(Vec<Abi>),
    Explicit(Vec<Abi>),
}

/// One discovered Qt installation.
#[derive(Debug, Clone)]
pub struct QtVersion {
    unique_id: i32,
    tool_path: Utf8PathBuf,
    unexpanded_display_name: String,
    subtype: Subtype,
    is_autodetected: bool,
    detection_source: String,
    override_features: Option<BTreeSet<String>>,
    metadata: InstallationMetadata,
    abi_state: AbiState,
    extra: IndexMap<String, serde_yaml_ng::Value>,
}

impl QtVersion {
    pub fn new(unique_id: i32, tool_path: Utf8PathBuf, subtype: Subtype) -> Self {
        Self {
            unique_id,
            unexpanded_display_name: default_display_name(&tool_path),
            metadata: InstallationMetadata::new(tool_path.clone()),
            tool_path,
            subtype,
            is_autodetected: false,
            detection_source: String::new(),
            override_features: None,
            abi_state: AbiState::Unknown,
            extra: IndexMap::new(),
        }
    }

    /// Rebuild a version from a persisted record. The caller has already picked
    /// the id (stored or freshly allocated) and the subtype.
    pub fn from_record(unique_id: i32, subtype: Subtype, record: &VersionRecord) -> Self {
        let mut version = Self::new(unique_id, Utf8PathBuf::from(&record.tool_path), subtype);
        if !record.name.is_empty() {
            version.unexpanded_display_name = record.name.clone();
        }
        version.is_autodetected = record.is_autodetected;
        version.detection_source = record.detection_source.clone();
        version.override_features = record
            .override_features
            .as_ref()
            .map(|features| features.iter().cloned().collect());
        if let Some(abis) = &record.abis {
            version.abi_state = AbiState::Explicit(abis.clone());
        }
        version.extra = record.extra.clone();
        version
    }

    pub fn to_record(&self) -> VersionRecord {
        VersionRecord {
            id: Some(self.unique_id),
            name: self.unexpanded_display_name.clone(),
            type_tag: self.subtype.type_tag().to_string(),
            tool_path: self.tool_path.to_string(),
            is_autodetected: self.is_autodetected,
            detection_source: self.detection_source.clone(),
            override_features: self
                .override_features
                .as_ref()
                .map(|features| features.iter().cloned().collect()),
            abis: match &self.abi_state {
                AbiState::Explicit(abis) => Some(abis.clone()),
                _ => None,
            },
            extra: self.extra.clone(),
        }
    }

    pub fn unique_id(&self) -> i32 {
        self.unique_id
    }

    pub(crate) fn set_unique_id(&mut self, unique_id: i32) {
        self.unique_id = unique_id;
    }

    pub fn tool_path(&self) -> &Utf8Path {
        &self.tool_path
    }

    /// Point the version at a different tool, keeping its id. All derived data
    /// is dropped and must be resolved again.
    pub fn replace_tool_path(&mut self, tool_path: Utf8PathBuf) {
        self.tool_path = tool_path;
        self.reset_cache();
    }

    pub fn subtype(&self) -> Subtype {
        self.subtype
    }

    pub fn type_tag(&self) -> &'static str {
        self.subtype.type_tag()
    }

    pub fn is_autodetected(&self) -> bool {
        self.is_autodetected
    }

    pub fn detection_source(&self) -> &str {
        &self.detection_source
    }

    pub fn set_detection(&mut self, is_autodetected: bool, detection_source: impl Into<String>) {
        self.is_autodetected = is_autodetected;
        self.detection_source = detection_source.into();
    }

    pub fn unexpanded_display_name(&self) -> &str {
        &self.unexpanded_display_name
    }

    pub fn set_unexpanded_display_name(&mut self, name: impl Into<String>) {
        self.unexpanded_display_name = name.into();
    }

    /// Display name with `%{Qt:...}` macros expanded against the metadata.
    pub fn display_name(&self) -> String {
        MACRO_PATTERN
            .replace_all(&self.unexpanded_display_name, |caps: &regex::Captures<'_>| {
                self.expand_macro(&caps[1])
            })
            .into_owned()
    }

    fn expand_macro(&self, name: &str) -> String {
        match name {
            "Version" => self.metadata.version_string.clone(),
            "Type" => self.subtype.description().to_string(),
            "Mkspec" => self.metadata.mkspec.clone(),
            "Name" => self
                .metadata
                .prefix
                .file_name()
                .unwrap_or_default()
                .to_string(),
            property => self.metadata.property(property).unwrap_or_default().to_string(),
        }
    }

    pub fn metadata(&self) -> &InstallationMetadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: InstallationMetadata) {
        self.metadata = metadata;
    }

    pub fn version(&self) -> VersionNumber {
        self.metadata.version()
    }

    /// Forget everything derived from querying the tool. Explicit ABIs survive.
    pub fn reset_cache(&mut self) {
        self.metadata = InstallationMetadata::new(self.tool_path.clone());
        if matches!(self.abi_state, AbiState::Inferred(_)) {
            self.abi_state = AbiState::Unknown;
        }
    }

    pub fn abi_state(&self) -> &AbiState {
        &self.abi_state
    }

    /// Known ABIs, or `None` while they have not been computed yet.
    pub fn qt_abis(&self) -> Option<&[Abi]> {
        match &self.abi_state {
            AbiState::Unknown => None,
            AbiState::Inferred(abis) | AbiState::Explicit(abis) => Some(abis),
        }
    }

    /// ABIs or an empty slice when unknown.
    pub fn abis_or_empty(&self) -> &[Abi] {
        self.qt_abis().unwrap_or(&[])
    }

    pub fn set_explicit_abis(&mut self, abis: Vec<Abi>) {
        self.abi_state = AbiState::Explicit(abis);
    }

    /// Store inferred ABIs unless explicit ones are already set.
    pub fn set_inferred_abis(&mut self, abis: Vec<Abi>) {
        if !matches!(self.abi_state, AbiState::Explicit(_)) {
            self.abi_state = AbiState::Inferred(abis);
        }
    }

    pub fn override_features(&self) -> Option<&BTreeSet<String>> {
        self.override_features.as_ref()
    }

    pub fn set_override_features(&mut self, features: Option<BTreeSet<String>>) {
        self.override_features = features;
    }

    /// Features offered by this installation: the override set when present,
    /// otherwise [`available_features`](Self::available_features).
    pub fn features(&self) -> BTreeSet<String> {
        match &self.override_features {
            Some(features) if !features.is_empty() => features.clone(),
            _ => self.available_features(),
        }
    }

    pub fn available_features(&self) -> BTreeSet<String> {
        let version = self.version();
        let mut features = versioned_ids("QtSupport.Wizards.FeatureQt", version.major, version.minor);
        features.insert("QtSupport.Wizards.FeatureQWidgets".to_string());

        if version.major >= 5 {
            features.extend(versioned_ids(
                "QtSupport.Wizards.FeatureQtQuick",
                version.major,
                version.minor,
            ));
        }
        if version >= VersionNumber::new(5, 7, 0) {
            features.insert("QtSupport.Wizards.FeatureQtQuick.Controls.2".to_string());
        }

        features.extend(
            self.subtype
                .descriptor()
                .features
                .iter()
                .map(|feature| feature.to_string()),
        );
        features
    }

    pub fn target_device_types(&self) -> &'static [DeviceType] {
        self.subtype.device_types()
    }

    pub fn platform_name(&self) -> &'static str {
        self.subtype.descriptor().platform_name
    }

    pub fn extra_fields(&self) -> &IndexMap<String, serde_yaml_ng::Value> {
        &self.extra
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_reason().is_none()
    }

    /// Human-readable reason why this version cannot be used, if any.
    pub fn invalid_reason(&self) -> Option<String> {
        let metadata = &self.metadata;

        if self.display_name().trim().is_empty() {
            return Some("Qt version has no name".to_string());
        }
        if self.tool_path.as_str().is_empty() {
            return Some("No qmake path set".to_string());
        }
        if !metadata.version_info_up_to_date {
            return Some("Qt version information has not been queried yet".to_string());
        }
        if !metadata.tool_is_executable || metadata.query_error.is_some() {
            let detail = metadata.query_error.as_deref().unwrap_or_default();
            return Some(format!("qmake does not exist or is not executable: {detail}"));
        }
        if !metadata.installed {
            return Some("Qt version is not properly installed, please run make install".to_string());
        }
        if metadata.bin.as_str().is_empty() {
            return Some(
                "Could not determine the path to the binaries of the Qt installation, maybe the qmake path is wrong?"
                    .to_string(),
            );
        }
        if metadata.mkspec_path.as_str().is_empty() {
            return Some("The default mkspec symlink is broken.".to_string());
        }
        None
    }

    /// Non-fatal problems worth showing next to a valid version.
    pub fn warning_reasons(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.abis_or_empty().is_empty() {
            warnings.push(
                "ABI detection failed: Make sure to use a matching compiler when building."
                    .to_string(),
            );
        }
        let raw = &self.metadata.raw_query_result;
        let installed_prefix = raw.raw("QT_INSTALL_PREFIX/get");
        if installed_prefix.is_some() && installed_prefix != raw.raw("QT_INSTALL_PREFIX") {
            warnings.push("Non-installed -prefix build - for internal development only.".to_string());
        }
        warnings
    }

    /// Structural equality of everything a user or installer can configure.
    /// Derived data (metadata, inferred ABIs) is ignored.
    pub fn is_equivalent_to(&self, other: &QtVersion) -> bool {
        let explicit = |v: &QtVersion| match &v.abi_state {
            AbiState::Explicit(abis) => Some(abis.clone()),
            _ => None,
        };
        self.unique_id == other.unique_id
            && self.subtype == other.subtype
            && self.tool_path == other.tool_path
            && self.unexpanded_display_name == other.unexpanded_display_name
            && self.is_autodetected == other.is_autodetected
            && self.detection_source == other.detection_source
            && self.override_features == other.override_features
            && explicit(self) == explicit(other)
            && self.extra == other.extra
    }
}

/// `prefix`, `prefix.MAJOR`, `prefix.MAJOR.0` ... `prefix.MAJOR.MINOR`.
fn versioned_ids(prefix: &str, major: u32, minor: u32) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    ids.insert(prefix.to_string());
    ids.insert(format!("{prefix}.{major}"));
    for m in 0..=minor {
        ids.insert(format!("{prefix}.{major}.{m}"));
    }
    ids
}

/// Display-name template for a freshly discovered tool.
pub fn default_display_name(tool_path: &Utf8Path) -> String {
    let location = if tool_path.starts_with("/usr") {
        "System".to_string()
    } else {
        // <prefix>/bin/qmake -> <prefix>
        tool_path
            .parent()
            .and_then(Utf8Path::parent)
            .and_then(Utf8Path::file_name)
            .unwrap_or("local")
            .to_string()
    };
    format!("Qt %{{Qt:Version}} ({location})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::abi::{Architecture, BinaryFormat, Os, OsFlavor};

    fn linux64() -> Abi {
        Abi::new(Architecture::X86, Os::Linux, OsFlavor::Generic, BinaryFormat::Elf, 64)
    }

    fn resolved(version_string: &str) -> QtVersion {
        let mut version = QtVersion::new(1, "/opt/Qt/6.5.0/gcc_64/bin/qmake".into(), Subtype::Desktop);
        let mut metadata = InstallationMetadata::new(version.tool_path().to_path_buf());
        metadata.version_string = version_string.to_string();
        metadata.prefix = "/opt/Qt/6.5.0/gcc_64".into();
        metadata.bin = "/opt/Qt/6.5.0/gcc_64/bin".into();
        metadata.mkspec = "linux-g++".into();
        metadata.mkspec_path = "/opt/Qt/6.5.0/gcc_64/mkspecs/linux-g++".into();
        metadata.installed = true;
        metadata.tool_is_executable = true;
        metadata.version_info_up_to_date = true;
        version.set_metadata(metadata);
        version
    }

    #[test]
    fn test_default_display_name() {
        assert_eq!(
            default_display_name(Utf8Path::new("/usr/bin/qmake6")),
            "Qt %{Qt:Version} (System)"
        );
        assert_eq!(
            default_display_name(Utf8Path::new("/opt/Qt/6.5.0/gcc_64/bin/qmake")),
            "Qt %{Qt:Version} (gcc_64)"
        );
    }

    #[test]
    fn test_display_name_expansion() {
        let mut version = resolved("6.5.0");
        assert_eq!(version.display_name(), "Qt 6.5.0 (gcc_64)");

        version.set_unexpanded_display_name("%{Qt:Name} %{Qt:Mkspec} %{Qt:Type} %{Qt:Bogus}!");
        assert_eq!(version.display_name(), "gcc_64 linux-g++ Desktop !");
    }

    #[test]
    fn test_valid_when_resolved() {
        let version = resolved("6.5.0");
        assert!(version.is_valid(), "{:?}", version.invalid_reason());
    }

    #[test]
    fn test_unresolved_is_invalid() {
        let version = QtVersion::new(1, "/usr/bin/qmake".into(), Subtype::Desktop);
        assert_eq!(
            version.invalid_reason().as_deref(),
            Some("Qt version information has not been queried yet")
        );
    }

    #[test]
    fn test_broken_mkspec_is_invalid() {
        let mut version = resolved("6.5.0");
        let mut metadata = version.metadata().clone();
        metadata.mkspec_path = Utf8PathBuf::new();
        version.set_metadata(metadata);
        assert_eq!(
            version.invalid_reason().as_deref(),
            Some("The default mkspec symlink is broken.")
        );
    }

    #[test]
    fn test_explicit_abis_are_sticky() {
        let mut version = resolved("6.5.0");
        version.set_explicit_abis(vec![linux64()]);
        version.set_inferred_abis(vec![]);
        assert_eq!(version.qt_abis(), Some(&[linux64()][..]));

        version.reset_cache();
        assert_eq!(version.qt_abis(), Some(&[linux64()][..]));
    }

    #[test]
    fn test_reset_cache_drops_inferred_abis() {
        let mut version = resolved("6.5.0");
        version.set_inferred_abis(vec![linux64()]);
        version.reset_cache();
        assert_eq!(version.qt_abis(), None);
        assert!(!version.metadata().version_info_up_to_date);
    }

    #[test]
    fn test_warning_when_abis_missing() {
        let mut version = resolved("6.5.0");
        version.set_inferred_abis(vec![]);
        assert!(version.warning_reasons()[0].starts_with("ABI detection failed"));
    }

    #[test]
    fn test_available_features_versioned() {
        let version = resolved("6.2.4");
        let features = version.available_features();
        assert!(features.contains("QtSupport.Wizards.FeatureQt"));
        assert!(features.contains("QtSupport.Wizards.FeatureQt.6"));
        assert!(features.contains("QtSupport.Wizards.FeatureQt.6.0"));
        assert!(features.contains("QtSupport.Wizards.FeatureQt.6.2"));
        assert!(!features.contains("QtSupport.Wizards.FeatureQt.6.3"));
        assert!(features.contains("QtSupport.Wizards.FeatureQtQuick.Controls.2"));
        assert!(features.contains("QtSupport.Wizards.FeatureDesktop"));
    }

    #[test]
    fn test_override_features_win() {
        let mut version = resolved("6.2.4");
        version.set_override_features(Some(["Custom.Feature".to_string()].into()));
        assert_eq!(version.features().len(), 1);
    }

    #[test]
    fn test_record_round_trip_and_equivalence() {
        let mut version = resolved("6.5.0");
        version.set_detection(true, "SDK.6.5.0.gcc_64");
        version.set_explicit_abis(vec![linux64()]);

        let record = version.to_record();
        let restored = QtVersion::from_record(1, Subtype::Desktop, &record);
        assert!(version.is_equivalent_to(&restored));

        let mut renamed = restored.clone();
        renamed.set_unexpanded_display_name("Renamed");
        assert!(!version.is_equivalent_to(&renamed));
    }
}
