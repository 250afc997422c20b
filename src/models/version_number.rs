use serde::{Deserialize, Serialize};
use std::fmt;

/// Dotted numeric version such as `6.5.3`.
///
/// Parsing is lenient: trailing non-numeric suffixes (`6.8.0-beta1`) are ignored
/// and missing components default to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct VersionNumber {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionNumber {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse the leading dotted-number part of `text`. Returns `None` if there is no
    /// leading number at all.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = [0u32; 3];
        let mut found = 0;

        for (index, component) in text.trim().split('.').take(3).enumerate() {
            let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            parts[index] = digits.parse().ok()?;
            found += 1;
            if digits.len() != component.len() {
                break;
            }
        }

        (found > 0).then(|| Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
