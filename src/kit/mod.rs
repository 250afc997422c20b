//! Kit association layer.
//!
//! A kit pairs a device type and a toolchain with one registry entry. Kits only
//! store the entry's unique id; every lookup goes through the
//! [`VersionRegistry`]. When an id stops resolving, the reference is cleared and
//! logged. A kit is never pointed at a different installation behind the user's back.

use crate::models::{Abi, DeviceType, NO_VERSION_ID, QtVersion};
use crate::state::{RegistryEvent, VersionRegistry};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The parts of a kit the Qt association needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kit {
    pub id: String,
    pub device_type: DeviceType,
    /// Target ABI of the kit's toolchain, if it has one.
    pub toolchain_abi: Option<Abi>,
}

impl Kit {
    pub fn new(id: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            id: id.into(),
            device_type,
            toolchain_abi: None,
        }
    }

    pub fn with_toolchain_abi(mut self, abi: Abi) -> Self {
        self.toolchain_abi = Some(abi);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KitError {
    #[error("Kit '{kit}' referred to Qt version {version_id}, which no longer exists")]
    StaleReference { kit: String, version_id: i32 },
}

/// How well `version` fits `kit`.
///
/// - 0: the version does not target the kit's device type, or no ABI is compatible
/// - 1: some ABI is compatible with the toolchain's
/// - 2: the toolchain's ABI is one of the version's ABIs
pub fn weight(version: &QtVersion, kit: &Kit) -> u8 {
    if !version.target_device_types().contains(&kit.device_type) {
        return 0;
    }
    let Some(target) = &kit.toolchain_abi else {
        return 0;
    };
    let abis = version.abis_or_empty();
    if abis.contains(target) {
        2
    } else if abis.iter().any(|abi| abi.is_compatible_with(target)) {
        1
    } else {
        0
    }
}

/// Kit → registry id assignments.
pub struct KitAspect {
    registry: Arc<VersionRegistry>,
    assignments: RwLock<HashMap<String, i32>>,
}

impl KitAspect {
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        Self {
            registry,
            assignments: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, kit_id: &str) -> Option<i32> {
        self.assignments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kit_id)
            .copied()
    }

    /// Assign a version to a kit. `None` or the reserved id clears the assignment.
    pub fn set(&self, kit_id: &str, unique_id: Option<i32>) {
        let mut assignments = self.assignments.write().unwrap_or_else(PoisonError::into_inner);
        match unique_id.filter(|id| *id != NO_VERSION_ID) {
            Some(id) => {
                if !self.registry.contains(id) {
                    tracing::warn!("Kit '{}' is assigned unknown Qt version {}", kit_id, id);
                }
                assignments.insert(kit_id.to_string(), id);
            }
            None => {
                assignments.remove(kit_id);
            }
        }
    }

    /// The version assigned to `kit_id`, if it still resolves.
    pub fn version(&self, kit_id: &str) -> Option<QtVersion> {
        self.get(kit_id).and_then(|id| self.registry.version(id))
    }

    /// Clear the kit's reference if its version is gone.
    ///
    /// # Returns
    /// `Err(StaleReference)` when a reference was cleared
    pub fn repair(&self, kit_id: &str) -> Result<(), KitError> {
        let Some(version_id) = self.get(kit_id) else {
            return Ok(());
        };
        if self.registry.contains(version_id) {
            return Ok(());
        }

        self.assignments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(kit_id);
        let error = KitError::StaleReference {
            kit: kit_id.to_string(),
            version_id,
        };
        tracing::warn!("{}; clearing the reference", error);
        Err(error)
    }

    /// Repair every kit referring to an id the event reports as removed or changed.
    pub fn handle_registry_event(&self, event: &RegistryEvent) -> Vec<KitError> {
        let RegistryEvent::VersionsChanged { removed, changed, .. } = event else {
            return Vec::new();
        };
        let affected: BTreeSet<i32> = removed.iter().chain(changed).copied().collect();
        if affected.is_empty() {
            return Vec::new();
        }

        let kits: Vec<String> = self
            .assignments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, id)| affected.contains(id))
            .map(|(kit, _)| kit.clone())
            .collect();
        kits.iter().filter_map(|kit| self.repair(kit).err()).collect()
    }

    /// Repair every kit.
    pub fn repair_all(&self) -> Vec<KitError> {
        let kits: Vec<String> = self
            .assignments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kits.iter().filter_map(|kit| self.repair(kit).err()).collect()
    }

    /// Weight of the kit's assigned version, 0 when none is assigned.
    pub fn weight(&self, kit: &Kit) -> u8 {
        self.version(&kit.id).map_or(0, |version| weight(&version, kit))
    }

    pub fn supported_platforms(&self, kit: &Kit) -> Vec<DeviceType> {
        self.version(&kit.id)
            .map(|version| version.target_device_types().to_vec())
            .unwrap_or_default()
    }

    pub fn available_features(&self, kit: &Kit) -> BTreeSet<String> {
        self.version(&kit.id)
            .map(|version| version.features())
            .unwrap_or_default()
    }

    /// Follow registry events and repair kits as they arrive.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.registry.subscribe();
        let aspect = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Kit repair missed {} registry event(s), checking all kits", missed);
                        if let Some(aspect) = aspect.upgrade() {
                            aspect.repair_all();
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(aspect) = aspect.upgrade() else {
                    break;
                };
                aspect.handle_registry_event(&event);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Architecture, BinaryFormat, Os, OsFlavor, Subtype};
    use camino::Utf8PathBuf;

    fn version_with(abis: Vec<Abi>, subtype: Subtype) -> QtVersion {
        let mut version = QtVersion::new(1, Utf8PathBuf::from("/opt/qt/bin/qmake"), subtype);
        version.set_explicit_abis(abis);
        version
    }

    fn linux(flavor: OsFlavor) -> Abi {
        Abi::new(Architecture::X86, Os::Linux, flavor, BinaryFormat::Elf, 64)
    }

    #[test]
    fn test_weight_levels() {
        let version = version_with(vec![linux(OsFlavor::Generic)], Subtype::Desktop);
        let kit = Kit::new("desktop", DeviceType::Desktop);

        assert_eq!(weight(&version, &kit), 0);
        assert_eq!(weight(&version, &kit.clone().with_toolchain_abi(linux(OsFlavor::Generic))), 2);
        assert_eq!(weight(&version, &kit.clone().with_toolchain_abi(linux(OsFlavor::Unknown))), 1);

        let arm = Abi::new(Architecture::Arm, Os::Linux, OsFlavor::Generic, BinaryFormat::Elf, 64);
        assert_eq!(weight(&version, &kit.with_toolchain_abi(arm)), 0);
    }

    #[test]
    fn test_weight_device_type_mismatch() {
        let version = version_with(vec![linux(OsFlavor::Generic)], Subtype::Desktop);
        let kit = Kit::new("android", DeviceType::Android).with_toolchain_abi(linux(OsFlavor::Generic));
        assert_eq!(weight(&version, &kit), 0);
    }
}
