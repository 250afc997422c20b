//! Qt version subtypes and the data-driven descriptor table used to pick one.
//!
//! Subtypes only differ in the devices they target, the features they add and
//! their description. Discovery and ABI inference are identical for all of them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Facts about an installation evaluated from its mkspec, used to pick a subtype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupData {
    pub platforms: Vec<String>,
    pub config: Vec<String>,
    pub is_qnx: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Desktop,
    GenericLinux,
    Android,
    IosDevice,
    IosSimulator,
    Qnx,
    Boot2Qt,
    WebAssembly,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Desktop => "Desktop",
            DeviceType::GenericLinux => "GenericLinuxOsType",
            DeviceType::Android => "Android.Device.Type",
            DeviceType::IosDevice => "Ios.Device.Type",
            DeviceType::IosSimulator => "Ios.Simulator.Type",
            DeviceType::Qnx => "QnxOsType",
            DeviceType::Boot2Qt => "QdbLinuxOsType",
            DeviceType::WebAssembly => "WebAssemblyDeviceType",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subtype {
    Desktop,
    EmbeddedLinux,
    Android,
    Ios,
    Qnx,
    Boot2Qt,
    WebAssembly,
}

/// One row of the subtype table.
pub struct SubtypeDescriptor {
    pub subtype: Subtype,
    /// Type tag stored in settings files.
    pub type_tag: &'static str,
    pub priority: i32,
    /// `None` means the descriptor matches everything.
    pub restriction: Option<fn(&SetupData) -> bool>,
    pub features: &'static [&'static str],
    pub device_types: &'static [DeviceType],
    pub platform_name: &'static str,
    pub description: &'static str,
}

fn contains(values: &[String], needle: &str) -> bool {
    values.iter().any(|v| v == needle)
}

fn targets_android(setup: &SetupData) -> bool {
    contains(&setup.platforms, "android")
}

fn targets_ios(setup: &SetupData) -> bool {
    contains(&setup.platforms, "ios")
}

fn targets_wasm(setup: &SetupData) -> bool {
    contains(&setup.platforms, "wasm")
}

fn targets_qnx(setup: &SetupData) -> bool {
    setup.is_qnx
}

fn targets_boot2qt(setup: &SetupData) -> bool {
    contains(&setup.config, "b2qt")
}

fn never(_: &SetupData) -> bool {
    false
}

// Sorted by descending priority; `Desktop` must stay last and unrestricted.
pub const SUBTYPE_TABLE: &[SubtypeDescriptor] = &[
    SubtypeDescriptor {
        subtype: Subtype::Android,
        type_tag: "Qt4ProjectManager.QtVersion.Android",
        priority: 90,
        restriction: Some(targets_android),
        features: &["QtSupport.Wizards.FeatureMobile", "Android.Wizards.FeatureAndroid"],
        device_types: &[DeviceType::Android],
        platform_name: "Android",
        description: "Android",
    },
    SubtypeDescriptor {
        subtype: Subtype::Ios,
        type_tag: "Qt4ProjectManager.QtVersion.Ios",
        priority: 90,
        restriction: Some(targets_ios),
        features: &["QtSupport.Wizards.FeatureMobile", "Ios.Wizards.FeatureIos"],
        device_types: &[DeviceType::IosDevice, DeviceType::IosSimulator],
        platform_name: "iOS",
        description: "iOS",
    },
    SubtypeDescriptor {
        subtype: Subtype::WebAssembly,
        type_tag: "Qt4ProjectManager.QtVersion.WebAssembly",
        priority: 90,
        restriction: Some(targets_wasm),
        features: &["WebAssembly.Wizards.FeatureWebAssembly"],
        device_types: &[DeviceType::WebAssembly],
        platform_name: "WebAssembly",
        description: "WebAssembly",
    },
    SubtypeDescriptor {
        subtype: Subtype::Qnx,
        type_tag: "Qt4ProjectManager.QtVersion.QNX.QNX",
        priority: 50,
        restriction: Some(targets_qnx),
        features: &["QtSupport.Wizards.FeatureQnx"],
        device_types: &[DeviceType::Qnx],
        platform_name: "QNX",
        description: "QNX",
    },
    SubtypeDescriptor {
        subtype: Subtype::Boot2Qt,
        type_tag: "Boot2Qt.QtVersionType",
        priority: 40,
        restriction: Some(targets_boot2qt),
        features: &["QtSupport.Wizards.FeatureBoot2Qt"],
        device_types: &[DeviceType::Boot2Qt],
        platform_name: "Boot2Qt",
        description: "Boot2Qt",
    },
    SubtypeDescriptor {
        subtype: Subtype::EmbeddedLinux,
        type_tag: "RemoteLinux.EmbeddedLinuxQt",
        priority: 10,
        // Never picked from query results, only restored from settings.
        restriction: Some(never),
        features: &["QtSupport.Wizards.FeatureEmbeddedLinux"],
        device_types: &[DeviceType::GenericLinux],
        platform_name: "Embedded Linux",
        description: "Embedded Linux",
    },
    SubtypeDescriptor {
        subtype: Subtype::Desktop,
        type_tag: "Qt4ProjectManager.QtVersion.Desktop",
        priority: 0,
        restriction: None,
        features: &["QtSupport.Wizards.FeatureDesktop"],
        device_types: &[DeviceType::Desktop],
        platform_name: "Desktop",
        description: "Desktop",
    },
];

impl SubtypeDescriptor {
    pub fn matches(&self, setup: &SetupData) -> bool {
        self.restriction.is_none_or(|restriction| restriction(setup))
    }
}

impl Subtype {
    pub fn descriptor(self) -> &'static SubtypeDescriptor {
        SUBTYPE_TABLE
            .iter()
            .find(|d| d.subtype == self)
            .unwrap_or(&SUBTYPE_TABLE[SUBTYPE_TABLE.len() - 1])
    }

    pub fn type_tag(self) -> &'static str {
        self.descriptor().type_tag
    }

    pub fn from_type_tag(tag: &str) -> Option<Subtype> {
        SUBTYPE_TABLE
            .iter()
            .find(|d| d.type_tag == tag)
            .map(|d| d.subtype)
    }

    pub fn device_types(self) -> &'static [DeviceType] {
        self.descriptor().device_types
    }

    pub fn description(self) -> &'static str {
        self.descriptor().description
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sorted_by_descending_priority() {
        let priorities: Vec<i32> = SUBTYPE_TABLE.iter().map(|d| d.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_desktop_is_last_and_unrestricted() {
        let last = SUBTYPE_TABLE.last().unwrap();
        assert_eq!(last.subtype, Subtype::Desktop);
        assert!(last.restriction.is_none());
    }

    #[test]
    fn test_type_tag_round_trip() {
        for descriptor in SUBTYPE_TABLE {
            assert_eq!(Subtype::from_type_tag(descriptor.type_tag), Some(descriptor.subtype));
        }
        assert_eq!(Subtype::from_type_tag("Nope"), None);
    }

    #[test]
    fn test_embedded_linux_never_matches_setup() {
        let setup = SetupData {
            platforms: vec!["linux".into()],
            config: vec!["embedded".into()],
            is_qnx: false,
        };
        assert!(!Subtype::EmbeddedLinux.descriptor().matches(&setup));
    }
}
