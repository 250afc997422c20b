use crate::models::RawQueryResult;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

/// `KEY:value` or `KEY/variant:value`. Values may contain further colons
/// (Windows drive letters), so only the first colon splits.
static PROPERTY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*(?:/(?:get|src|dev|raw))?):(.*)$")
        .expect("Invalid property line regex")
});

/// Parse raw `<tool> -query` output into a property map.
///
/// Never fails: lines that do not look like `KEY:value` (warnings, sandbox noise
/// leaked onto stdout, blank lines) are skipped. A repeated key keeps its last value.
pub fn parse_query_output(raw: &[u8]) -> RawQueryResult {
    let text = String::from_utf8_lossy(raw);
    let mut properties = IndexMap::new();
    let mut skipped = 0usize;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match PROPERTY_LINE.captures(line) {
            Some(caps) => {
                let key = caps[1].to_string();
                let value = caps[2].trim().to_string();
                properties.insert(key, value);
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} unparsable query output line(s)", skipped);
    }

    RawQueryResult::from_properties(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyVariant;

    const SAMPLE: &str = "QT_SYSROOT:\n\
QT_INSTALL_PREFIX:/opt/Qt/6.5.0/gcc_64\n\
QT_INSTALL_PREFIX/dev:/home/build/qt\n\
QT_INSTALL_BINS:/opt/Qt/6.5.0/gcc_64/bin\n\
QT_INSTALL_DEMOS:**Unknown**\n\
QMAKE_VERSION:3.1\n\
QT_VERSION:6.5.0\n";

    #[test]
    fn test_parse_sample() {
        let result = parse_query_output(SAMPLE.as_bytes());
        assert_eq!(result.get("QT_INSTALL_PREFIX"), "/opt/Qt/6.5.0/gcc_64");
        assert_eq!(
            result.value("QT_INSTALL_PREFIX", PropertyVariant::Dev),
            Some("/home/build/qt")
        );
        assert_eq!(result.get("QT_VERSION"), "6.5.0");
        assert_eq!(result.raw("QT_SYSROOT"), Some(""));
        assert!(result.contains_sentinel());
    }

    #[test]
    fn test_windows_paths_and_crlf() {
        let result = parse_query_output(b"QT_INSTALL_PREFIX:C:/Qt/6.5.0/msvc2019_64\r\nQMAKE_VERSION:3.1\r\n");
        assert_eq!(result.get("QT_INSTALL_PREFIX"), "C:/Qt/6.5.0/msvc2019_64");
    }

    #[test]
    fn test_noise_is_skipped() {
        let raw = b"could not open /dev/shm\nqemu-aarch64: uncaught target signal 11\n\nQT_VERSION:5.15.2\n";
        let result = parse_query_output(raw);
        assert_eq!(result.len(), 1);
        assert!(!result.contains_sentinel());
    }

    #[test]
    fn test_malformed_input_gives_empty_map() {
        assert!(parse_query_output(b"\xff\xfe garbage").is_empty());
        assert!(parse_query_output(b"").is_empty());
    }

    #[test]
    fn test_last_occurrence_wins() {
        let result = parse_query_output(b"QT_VERSION:6.5.0\nQT_INSTALL_BINS:/opt/qt/bin\nQT_VERSION:5.0.0\n");
        assert_eq!(result.get("QT_VERSION"), "5.0.0");
        assert_eq!(result.iter().next(), Some(("QT_VERSION", "5.0.0")));
    }
}
