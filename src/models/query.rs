use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Property the query tool always prints; its presence marks trustworthy output.
pub const SENTINEL_PROPERTY: &str = "QMAKE_VERSION";

/// Value printed by query tools for properties they cannot determine.
const UNKNOWN_VALUE: &str = "**Unknown**";

/// Which flavor of a property to read.
///
/// Query tools print some properties several times with a `/get`, `/src` or
/// `/dev` suffix (install location vs. source tree vs. developer build).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyVariant {
    Get,
    Src,
    Dev,
}

impl PropertyVariant {
    fn suffix(self) -> &'static str {
        match self {
            PropertyVariant::Get => "/get",
            PropertyVariant::Src => "/src",
            PropertyVariant::Dev => "/dev",
        }
    }
}

/// Parsed output of `<tool> -query`: property key (possibly suffixed) to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawQueryResult {
    properties: IndexMap<String, String>,
}

impl RawQueryResult {
    pub fn from_properties(properties: IndexMap<String, String>) -> Self {
        Self { properties }
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Exact lookup of a key as printed by the tool, suffix included.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|value| *value != UNKNOWN_VALUE)
    }

    /// Look up `name` honoring the variant fallback chain:
    /// `Get` tries `name/get` then `name`; `Src` and `Dev` try their own
    /// suffix first and then fall back to the `Get` rule.
    pub fn value(&self, name: &str, variant: PropertyVariant) -> Option<&str> {
        let suffixed = format!("{}{}", name, variant.suffix());
        if let Some(value) = self.raw(&suffixed) {
            return Some(value);
        }
        match variant {
            PropertyVariant::Get => self.raw(name),
            PropertyVariant::Src | PropertyVariant::Dev => self.value(name, PropertyVariant::Get),
        }
    }

    /// Shorthand for `value(name, Get)` returning an empty string when absent.
    pub fn get(&self, name: &str) -> &str {
        self.value(name, PropertyVariant::Get).unwrap_or("")
    }

    pub fn contains_sentinel(&self) -> bool {
        self.raw(SENTINEL_PROPERTY).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
