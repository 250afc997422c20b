//! mkspec resolution and a small qmake assignment evaluator.
//!
//! Only what subtype selection and the default build configuration need is
//! understood: plain assignments (`=`, `+=`, `-=`, `*=`), `include(...)`,
//! `$$VAR`/`$${VAR}`/`$$[PROPERTY]` expansion and line continuations. Scopes
//! and function calls are skipped.

use crate::models::{BuildConfig, PropertyVariant, RawQueryResult, SetupData};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

const MAX_INCLUDE_DEPTH: usize = 16;

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)\s*(=|\+=|-=|\*=)\s*(.*)$")
        .expect("Invalid assignment regex")
});

static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^include\(\s*([^)]*?)\s*\)$").expect("Invalid include regex"));

static VARIABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$\[([A-Za-z0-9_/]+)\]|\$\$\{([A-Za-z0-9_.]+)\}|\$\$([A-Za-z0-9_.]+)")
        .expect("Invalid variable reference regex")
});

/// Variables collected while evaluating qmake files.
pub struct ProFileEvaluator<'a> {
    properties: &'a RawQueryResult,
    variables: IndexMap<String, Vec<String>>,
    depth: usize,
}

impl<'a> ProFileEvaluator<'a> {
    pub fn new(properties: &'a RawQueryResult) -> Self {
        Self {
            properties,
            variables: IndexMap::new(),
            depth: 0,
        }
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.variables.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn value(&self, name: &str) -> String {
        self.values(name).join(" ")
    }

    pub fn contains(&self, name: &str, value: &str) -> bool {
        self.values(name).iter().any(|v| v == value)
    }

    /// Evaluate one file. Unreadable includes are skipped.
    pub fn evaluate_file(&mut self, path: &Utf8Path) -> bool {
        let Ok(text) = std::fs::read_to_string(path) else {
            tracing::debug!("Cannot read qmake file {}", path);
            return false;
        };
        let base = path.parent().unwrap_or(Utf8Path::new("."));
        self.evaluate_text(&text, base);
        true
    }

    pub fn evaluate_text(&mut self, text: &str, base_dir: &Utf8Path) {
        for line in logical_lines(text) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = INCLUDE.captures(line) {
                let target = self.expand(&caps[1], base_dir);
                let target = target.trim_matches('"');
                let path = if Utf8Path::new(target).is_absolute() {
                    Utf8PathBuf::from(target)
                } else {
                    base_dir.join(target)
                };
                if self.depth >= MAX_INCLUDE_DEPTH {
                    tracing::warn!("Include depth exceeded at {}", path);
                    continue;
                }
                self.depth += 1;
                self.evaluate_file(&path);
                self.depth -= 1;
                continue;
            }

            let Some(caps) = ASSIGNMENT.captures(line) else {
                continue;
            };
            let name = caps[1].to_string();
            let values: Vec<String> = self
                .expand(&caps[3], base_dir)
                .split_whitespace()
                .map(str::to_string)
                .collect();

            let slot = self.variables.entry(name).or_default();
            match &caps[2] {
                "=" => *slot = values,
                "+=" => slot.extend(values),
                "-=" => slot.retain(|v| !values.contains(v)),
                _ => {
                    for value in values {
                        if !slot.contains(&value) {
                            slot.push(value);
                        }
                    }
                }
            }
        }
    }

    fn expand(&self, text: &str, base_dir: &Utf8Path) -> String {
        VARIABLE_REF
            .replace_all(text, |caps: &regex::Captures<'_>| {
                if let Some(property) = caps.get(1) {
                    return self
                        .properties
                        .value(property.as_str(), PropertyVariant::Get)
                        .unwrap_or_default()
                        .to_string();
                }
                let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
                if name == "PWD" {
                    base_dir.to_string()
                } else {
                    self.value(name)
                }
            })
            .into_owned()
    }
}

/// Split into logical lines: comments removed, `\` continuations joined.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in text.lines() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let trimmed = line.trim_end();
        if let Some(continued) = trimmed.strip_suffix('\\') {
            current.push_str(continued);
            current.push(' ');
        } else {
            current.push_str(trimmed);
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Everything the engine reads from an installation's mkspec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MkspecInfo {
    /// Spec name relative to the mkspecs directory, e.g. `linux-g++`.
    pub name: String,
    pub path: Utf8PathBuf,
    pub default_build_config: BuildConfig,
    pub framework_build: bool,
    pub is_cross_build: bool,
    pub config_values: Vec<String>,
    pub qt_config_values: Vec<String>,
    pub platforms: Vec<String>,
    pub is_qnx: bool,
}

impl MkspecInfo {
    pub fn setup_data(&self) -> SetupData {
        SetupData {
            platforms: self.platforms.clone(),
            config: self.config_values.clone(),
            is_qnx: self.is_qnx,
        }
    }
}

/// `<QT_HOST_DATA>/mkspecs`.
pub fn mkspecs_directory(properties: &RawQueryResult) -> Option<Utf8PathBuf> {
    let host_data = properties
        .value("QT_HOST_DATA", PropertyVariant::Get)
        .or_else(|| properties.value("QT_INSTALL_ARCHDATA", PropertyVariant::Get))
        .or_else(|| properties.value("QT_INSTALL_PREFIX", PropertyVariant::Get))?;
    Some(Utf8Path::new(host_data).join("mkspecs"))
}

/// Locate the target spec directory. `None` means the mkspec is broken.
pub fn resolve_spec_directory(properties: &RawQueryResult) -> Option<(String, Utf8PathBuf)> {
    let mkspecs = mkspecs_directory(properties)?;
    let spec = properties
        .value("QMAKE_XSPEC", PropertyVariant::Get)
        .or_else(|| properties.value("QMAKE_SPEC", PropertyVariant::Get))
        .unwrap_or("default");

    let mut dir = mkspecs.join(spec);
    if spec == "default" {
        dir = resolve_default_spec(&mkspecs, &dir)?;
    }
    if !dir.is_dir() {
        tracing::debug!("mkspec directory {} does not exist", dir);
        return None;
    }

    let name = dir
        .strip_prefix(&mkspecs)
        .map(|rel| rel.as_str().replace('\\', "/"))
        .unwrap_or_else(|_| dir.file_name().unwrap_or_default().to_string());
    Some((name, dir))
}

/// `default` is a symlink (old installs) or a stub `qmake.conf` naming the original.
fn resolve_default_spec(mkspecs: &Utf8Path, default: &Utf8Path) -> Option<Utf8PathBuf> {
    if default.is_symlink() {
        return default.canonicalize_utf8().ok();
    }

    let empty = RawQueryResult::default();
    let mut evaluator = ProFileEvaluator::new(&empty);
    if evaluator.evaluate_file(&default.join("qmake.conf")) {
        let original = evaluator.value("QMAKESPEC_ORIGINAL");
        if !original.is_empty() {
            let original = Utf8PathBuf::from(original);
            return Some(if original.is_absolute() {
                original
            } else {
                mkspecs.join(original)
            });
        }
    }
    default.is_dir().then(|| default.to_path_buf())
}

/// Resolve and evaluate the mkspec of an installation.
pub fn read_mkspec(properties: &RawQueryResult) -> Option<MkspecInfo> {
    let (name, path) = resolve_spec_directory(properties)?;

    let mut spec = ProFileEvaluator::new(properties);
    spec.evaluate_file(&path.join("qmake.conf"));

    let mut qconfig = ProFileEvaluator::new(properties);
    if let Some(mkspecs) = mkspecs_directory(properties) {
        qconfig.evaluate_file(&mkspecs.join("qconfig.pri"));
    }

    let mut config_values = spec.values("CONFIG").to_vec();
    for value in qconfig.values("CONFIG") {
        if !config_values.contains(value) {
            config_values.push(value.clone());
        }
    }
    let qt_config_values = qconfig.values("QT_CONFIG").to_vec();

    let framework_build = config_values.iter().any(|v| v == "qt_framework")
        || qt_config_values.iter().any(|v| v == "qt_framework");

    let xspec = properties.value("QMAKE_XSPEC", PropertyVariant::Get);
    let host_spec = properties.value("QMAKE_SPEC", PropertyVariant::Get);
    let is_cross_build = matches!((xspec, host_spec), (Some(x), Some(s)) if x != s);

    Some(MkspecInfo {
        name,
        path,
        default_build_config: build_config(qconfig.values("CONFIG")),
        framework_build,
        is_cross_build,
        config_values,
        qt_config_values,
        platforms: spec.values("QMAKE_PLATFORM").to_vec(),
        is_qnx: !spec.value("QNX_CPUDIR").is_empty(),
    })
}

/// The last of `debug`/`release` wins unless both are built.
pub fn build_config(config: &[String]) -> BuildConfig {
    if config
        .iter()
        .any(|v| v == "debug_and_release" || v == "build_all")
    {
        return BuildConfig::DebugAndRelease;
    }
    config
        .iter()
        .rev()
        .find_map(|v| match v.as_str() {
            "debug" => Some(BuildConfig::Debug),
            "release" => Some(BuildConfig::Release),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_parser::parse_query_output;
    use tempfile::TempDir;

    fn write(path: &Utf8Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_assignment_operators() {
        let empty = RawQueryResult::default();
        let mut evaluator = ProFileEvaluator::new(&empty);
        evaluator.evaluate_text(
            "CONFIG = a b\nCONFIG += c\nCONFIG -= a\nCONFIG *= b d\n# CONFIG += hidden\n",
            Utf8Path::new("/"),
        );
        assert_eq!(evaluator.values("CONFIG"), ["b", "c", "d"]);
    }

    #[test]
    fn test_expansion_and_continuation() {
        let properties = parse_query_output(b"QT_INSTALL_PREFIX:/opt/qt\n");
        let mut evaluator = ProFileEvaluator::new(&properties);
        evaluator.evaluate_text(
            "BASE = x86\nQMAKE_PLATFORM = linux \\\n    $$BASE $${BASE}_64\nDIR = $$[QT_INSTALL_PREFIX]/lib\n",
            Utf8Path::new("/"),
        );
        assert_eq!(evaluator.values("QMAKE_PLATFORM"), ["linux", "x86", "x86_64"]);
        assert_eq!(evaluator.value("DIR"), "/opt/qt/lib");
    }

    #[test]
    fn test_build_config() {
        let list = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        assert_eq!(build_config(&list(&["shared", "release"])), BuildConfig::Release);
        assert_eq!(build_config(&list(&["release", "debug"])), BuildConfig::Debug);
        assert_eq!(build_config(&list(&["debug", "build_all"])), BuildConfig::DebugAndRelease);
        assert_eq!(build_config(&[]), BuildConfig::Release);
    }

    #[test]
    fn test_read_mkspec_with_include() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let mkspecs = root.join("mkspecs");
        write(
            &mkspecs.join("common/linux.conf"),
            "QMAKE_PLATFORM += linux\nCONFIG += incremental\n",
        );
        write(
            &mkspecs.join("linux-g++/qmake.conf"),
            "MAKEFILE_GENERATOR = UNIX\nQMAKE_PLATFORM = unix\ninclude(../common/linux.conf)\nload(qt_config)\n",
        );
        write(
            &mkspecs.join("qconfig.pri"),
            "CONFIG += shared release\nQT_CONFIG += opengl\n",
        );

        let properties = parse_query_output(
            format!("QT_HOST_DATA:{root}\nQMAKE_SPEC:linux-g++\nQMAKE_XSPEC:linux-g++\n").as_bytes(),
        );
        let info = read_mkspec(&properties).unwrap();
        assert_eq!(info.name, "linux-g++");
        assert_eq!(info.platforms, ["unix", "linux"]);
        assert_eq!(info.config_values, ["incremental", "shared", "release"]);
        assert_eq!(info.qt_config_values, ["opengl"]);
        assert_eq!(info.default_build_config, BuildConfig::Release);
        assert!(!info.is_cross_build);
        assert!(!info.is_qnx);
    }

    #[test]
    fn test_cross_qnx_spec() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        write(
            &root.join("mkspecs/qnx-aarch64le-qcc/qmake.conf"),
            "QMAKE_PLATFORM = qnx unix\nQNX_CPUDIR = aarch64le\n",
        );

        let properties = parse_query_output(
            format!("QT_HOST_DATA:{root}\nQMAKE_SPEC:linux-g++\nQMAKE_XSPEC:qnx-aarch64le-qcc\n")
                .as_bytes(),
        );
        let info = read_mkspec(&properties).unwrap();
        assert!(info.is_cross_build);
        assert!(info.is_qnx);
        assert!(info.setup_data().is_qnx);
    }

    #[test]
    fn test_default_spec_stub() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        write(&root.join("mkspecs/macx-clang/qmake.conf"), "QMAKE_PLATFORM = macos osx\n");
        write(
            &root.join("mkspecs/default/qmake.conf"),
            "QMAKESPEC_ORIGINAL = macx-clang\n",
        );

        let properties = parse_query_output(format!("QT_HOST_DATA:{root}\n").as_bytes());
        let (name, path) = resolve_spec_directory(&properties).unwrap();
        assert_eq!(name, "macx-clang");
        assert!(path.ends_with("macx-clang"));
    }

    #[test]
    fn test_missing_spec_is_broken() {
        let properties = parse_query_output(b"QT_HOST_DATA:/does/not/exist\nQMAKE_XSPEC:linux-g++\n");
        assert!(read_mkspec(&properties).is_none());
    }
}
