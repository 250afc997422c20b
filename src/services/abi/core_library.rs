use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Core module file names for Qt 4 to 6 with the platform prefix and the optional
/// debug or Android ABI suffix; the capture is everything after the first dot.
static CORE_LIBRARY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:lib)?Qt[56]?Core(?:d|_[A-Za-z0-9_-]+)?\.(.+)$")
        .expect("Invalid core library name regex")
});

static SHARED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:dll|so(?:\.\d+)*|(?:\d+\.)*dylib)$").expect("Invalid shared suffix regex")
});

const FRAMEWORK_NAMES: &[&str] = &["QtCore.framework"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryKind {
    Dynamic,
    Static,
}

/// Classify a file name as a dynamic or static core library.
pub fn classify(file_name: &str) -> Option<LibraryKind> {
    let caps = CORE_LIBRARY_NAME.captures(file_name)?;
    let suffix = &caps[1];
    if SHARED_SUFFIX.is_match(suffix) {
        Some(LibraryKind::Dynamic)
    } else if suffix == "a" || suffix == "lib" {
        Some(LibraryKind::Static)
    } else {
        None
    }
}

/// Core library files found in an installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreLibraries {
    pub dynamic: Vec<Utf8PathBuf>,
    pub static_libs: Vec<Utf8PathBuf>,
}

impl CoreLibraries {
    /// Dynamic libraries when there are any, otherwise the static ones.
    pub fn preferred(&self) -> &[Utf8PathBuf] {
        if self.dynamic.is_empty() {
            &self.static_libs
        } else {
            &self.dynamic
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dynamic.is_empty() && self.static_libs.is_empty()
    }
}

/// Scan `dirs` (usually the library and binary directories) for core library files.
///
/// Symlinked version aliases (`libQt6Core.so`, `libQt6Core.so.6`, ...) resolve to
/// one file and are only reported once. Missing directories are skipped.
pub fn find_core_libraries(dirs: &[&Utf8Path]) -> CoreLibraries {
    let mut found = CoreLibraries::default();
    let mut seen = HashSet::new();

    for dir in dirs {
        if dir.as_str().is_empty() {
            continue;
        }
        let Ok(entries) = dir.read_dir_utf8() else {
            tracing::debug!("Skipping unreadable library directory {}", dir);
            continue;
        };

        let mut names: Vec<Utf8PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path().to_path_buf())
            .collect();
        names.sort();

        for path in names {
            let Some(file_name) = path.file_name() else {
                continue;
            };

            let (candidate, kind) = if FRAMEWORK_NAMES.contains(&file_name) {
                (path.join("QtCore"), LibraryKind::Dynamic)
            } else {
                match classify(file_name) {
                    Some(kind) => (path.clone(), kind),
                    None => continue,
                }
            };

            if !candidate.is_file() {
                continue;
            }
            let identity = candidate
                .canonicalize_utf8()
                .unwrap_or_else(|_| candidate.clone());
            if !seen.insert(identity) {
                continue;
            }

            match kind {
                LibraryKind::Dynamic => found.dynamic.push(candidate),
                LibraryKind::Static => found.static_libs.push(candidate),
            }
        }
    }

    found
}
