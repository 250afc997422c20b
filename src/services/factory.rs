use crate::models::subtype::{SUBTYPE_TABLE, SubtypeDescriptor};
use crate::models::{Environment, InstallationMetadata, QtVersion, SetupData, Subtype, VersionRecord};
use crate::services::metadata::VersionResolver;
use crate::services::query_tool::QueryError;
use camino::Utf8Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
    #[error("No Qt version type matches the installation")]
    NoMatchingFactory,

    #[error("Unknown Qt version type '{0}'")]
    UnknownType(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Highest-priority descriptor of `table` whose restriction accepts `setup`.
pub fn select_descriptor<'a>(
    table: &'a [SubtypeDescriptor],
    setup: &SetupData,
) -> Option<&'a SubtypeDescriptor> {
    let mut ordered: Vec<&SubtypeDescriptor> = table.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered.into_iter().find(|descriptor| descriptor.matches(setup))
}

/// Pick the subtype for an installation. Always succeeds: `Desktop` accepts everything.
pub fn identify(setup: &SetupData) -> Subtype {
    select_descriptor(SUBTYPE_TABLE, setup)
        .map(|descriptor| descriptor.subtype)
        .unwrap_or(Subtype::Desktop)
}

pub fn setup_data(metadata: &InstallationMetadata) -> SetupData {
    SetupData {
        platforms: metadata.platforms.clone(),
        config: metadata.config_values.clone(),
        is_qnx: metadata.is_qnx,
    }
}

/// Creates [`QtVersion`]s from tool paths and persisted records.
pub struct VersionFactory {
    resolver: Arc<VersionResolver>,
}

impl VersionFactory {
    pub fn new(resolver: Arc<VersionResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<VersionResolver> {
        &self.resolver
    }

    /// Query a tool and build a fully resolved version with the given id.
    pub async fn create_from_tool_path(
        &self,
        tool_path: &Utf8Path,
        is_autodetected: bool,
        detection_source: &str,
        unique_id: i32,
    ) -> Result<QtVersion, FactoryError> {
        let metadata = self
            .resolver
            .metadata_resolver()
            .resolve(tool_path, &Environment::new())
            .await?;

        let descriptor = select_descriptor(SUBTYPE_TABLE, &setup_data(&metadata)).ok_or_else(|| {
            tracing::error!("No subtype descriptor accepted {}", tool_path);
            FactoryError::NoMatchingFactory
        })?;

        let mut version = QtVersion::new(unique_id, tool_path.to_path_buf(), descriptor.subtype);
        version.set_detection(is_autodetected, detection_source);
        version.set_metadata(metadata);
        self.resolver.ensure_abis(&mut version).await;

        tracing::info!(
            "Created {} version {} (id {}) from {}",
            descriptor.description,
            version.display_name(),
            unique_id,
            tool_path
        );
        Ok(version)
    }

    /// Rebuild a version from a settings record. Nothing is queried.
    pub fn create_from_record(
        &self,
        unique_id: i32,
        record: &VersionRecord,
    ) -> Result<QtVersion, FactoryError> {
        let subtype = Subtype::from_type_tag(&record.type_tag)
            .ok_or_else(|| FactoryError::UnknownType(record.type_tag.clone()))?;
        Ok(QtVersion::from_record(unique_id, subtype, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn setup(platforms: &[&str], config: &[&str], is_qnx: bool) -> SetupData {
        SetupData {
            platforms: platforms.iter().map(|s| s.to_string()).collect(),
            config: config.iter().map(|s| s.to_string()).collect(),
            is_qnx,
        }
    }

    #[test]
    fn test_identify_restricted_subtypes() {
        assert_eq!(identify(&setup(&["android", "linux"], &[], false)), Subtype::Android);
        assert_eq!(identify(&setup(&["ios", "uikit"], &[], false)), Subtype::Ios);
        assert_eq!(identify(&setup(&["wasm", "unix"], &[], false)), Subtype::WebAssembly);
        assert_eq!(identify(&setup(&["qnx"], &[], true)), Subtype::Qnx);
        assert_eq!(identify(&setup(&["linux"], &["b2qt"], false)), Subtype::Boot2Qt);
        assert_eq!(identify(&setup(&["linux", "unix"], &["shared"], false)), Subtype::Desktop);
    }

    #[test]
    fn test_priority_beats_table_order() {
        // Android outranks QNX even when both restrictions match.
        assert_eq!(identify(&setup(&["android"], &[], true)), Subtype::Android);
    }

    #[test]
    fn test_table_without_fallback_can_fail() {
        let table = &SUBTYPE_TABLE[..SUBTYPE_TABLE.len() - 1];
        assert!(select_descriptor(table, &SetupData::default()).is_none());
    }

    proptest! {
        #[test]
        fn prop_identify_never_fails(
            platforms in proptest::collection::vec("[a-z]{1,8}", 0..4),
            config in proptest::collection::vec("[a-z_]{1,10}", 0..4),
            is_qnx in any::<bool>(),
        ) {
            let setup = SetupData { platforms, config, is_qnx };
            let subtype = identify(&setup);
            let restricted_match = SUBTYPE_TABLE
                .iter()
                .any(|d| d.restriction.is_some() && d.matches(&setup));
            if !restricted_match {
                prop_assert_eq!(subtype, Subtype::Desktop);
            }
        }
    }
}
