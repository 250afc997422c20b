use crate::models::abi::push_unique;
use crate::models::{Abi, Architecture, BinaryFormat, Os, OsFlavor, VersionNumber};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

/// File name of the core module descriptor shipped with Qt 6.
pub const CORE_MODULE_FILE: &str = "Core.json";

/// First release writing the `platforms` descriptor shape.
pub const PLATFORMS_SCHEMA_VERSION: VersionNumber = VersionNumber::new(6, 9, 0);

/// Problems with a module descriptor. Never fatal: the next strategy runs instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataParseError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid JSON in {path}: {message}")]
    Json { path: String, message: String },

    #[error("Missing field '{0}' in module descriptor")]
    MissingField(&'static str),

    #[error("Unknown target system '{0}'")]
    UnknownOs(String),

    #[error("Unknown architecture '{0}'")]
    UnknownArchitecture(String),
}

#[derive(Debug, Deserialize)]
struct ModuleDescriptor {
    built_with: Option<BuiltWith>,
    platforms: Option<Vec<PlatformEntry>>,
}

/// Descriptor shape before 6.9.
#[derive(Debug, Deserialize)]
struct BuiltWith {
    target_system: Option<String>,
    architecture: Option<String>,
    compiler_id: Option<String>,
    compiler_version: Option<String>,
}

/// Descriptor shape from 6.9 on.
#[derive(Debug, Deserialize)]
struct PlatformEntry {
    target_system: Option<String>,
    compiler_id: Option<String>,
    compiler_version: Option<String>,
    #[serde(default)]
    targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    architecture: Option<String>,
}

/// First `Core.json` found below `<dir>/` for each candidate directory.
pub fn find_core_descriptor(dirs: &[&Utf8Path]) -> Option<Utf8PathBuf> {
    dirs.iter()
        .filter(|dir| !dir.as_str().is_empty())
        .map(|dir| dir.join(CORE_MODULE_FILE))
        .find(|path| path.is_file())
}

pub fn abis_from_descriptor_file(
    path: &Utf8Path,
    version: VersionNumber,
) -> Result<Vec<Abi>, MetadataParseError> {
    let content = std::fs::read_to_string(path).map_err(|e| MetadataParseError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    abis_from_descriptor(&content, version).map_err(|e| match e {
        MetadataParseError::Json { message, .. } => MetadataParseError::Json {
            path: path.to_string(),
            message,
        },
        other => other,
    })
}

/// Decode a module descriptor. The shape is picked from `version`.
///
/// Darwin and iOS targets are skipped: their descriptors do not say enough to
/// distinguish simulator from device slices, so those installations fall back to
/// reading the core library.
pub fn abis_from_descriptor(
    content: &str,
    version: VersionNumber,
) -> Result<Vec<Abi>, MetadataParseError> {
    let descriptor: ModuleDescriptor =
        serde_json::from_str(content).map_err(|e| MetadataParseError::Json {
            path: String::new(),
            message: e.to_string(),
        })?;

    let mut abis = Vec::new();

    if version < PLATFORMS_SCHEMA_VERSION {
        let built_with = descriptor
            .built_with
            .ok_or(MetadataParseError::MissingField("built_with"))?;
        let architecture = built_with
            .architecture
            .as_deref()
            .ok_or(MetadataParseError::MissingField("built_with.architecture"))?;
        let target = TargetInfo::new(
            built_with.target_system.as_deref(),
            built_with.compiler_id.as_deref(),
            built_with.compiler_version.as_deref(),
        )?;
        if let Some(abi) = target.abi(architecture)? {
            push_unique(&mut abis, abi);
        }
    } else {
        let platforms = descriptor
            .platforms
            .ok_or(MetadataParseError::MissingField("platforms"))?;
        for platform in &platforms {
            let target = TargetInfo::new(
                platform.target_system.as_deref(),
                platform.compiler_id.as_deref(),
                platform.compiler_version.as_deref(),
            )?;
            for entry in &platform.targets {
                let architecture = entry
                    .architecture
                    .as_deref()
                    .ok_or(MetadataParseError::MissingField("targets.architecture"))?;
                if let Some(abi) = target.abi(architecture)? {
                    push_unique(&mut abis, abi);
                }
            }
        }
    }

    Ok(abis)
}

/// OS side of one descriptor entry. `os == None` marks Darwin/iOS.
struct TargetInfo<'a> {
    target_system: &'a str,
    os: Option<Os>,
    flavor: OsFlavor,
}

impl<'a> TargetInfo<'a> {
    fn new(
        target_system: Option<&'a str>,
        compiler_id: Option<&str>,
        compiler_version: Option<&str>,
    ) -> Result<Self, MetadataParseError> {
        let target_system =
            target_system.ok_or(MetadataParseError::MissingField("target_system"))?;

        let (os, flavor) = match target_system {
            "Linux" => (Some(Os::Linux), OsFlavor::Generic),
            "Android" => (Some(Os::Linux), OsFlavor::Android),
            "Darwin" | "iOS" => (None, OsFlavor::Generic),
            "Windows" => (
                Some(Os::Windows),
                windows_flavor(compiler_id.unwrap_or_default(), compiler_version.unwrap_or_default()),
            ),
            "FreeBSD" => (Some(Os::Bsd), OsFlavor::FreeBsd),
            "NetBSD" => (Some(Os::Bsd), OsFlavor::NetBsd),
            "OpenBSD" => (Some(Os::Bsd), OsFlavor::OpenBsd),
            other if other.ends_with("BSD") => (Some(Os::Bsd), OsFlavor::Generic),
            "QNX" => (Some(Os::Qnx), OsFlavor::Generic),
            // WebAssembly targets report Emscripten or WASI; the architecture decides.
            _ => (Some(Os::Unknown), OsFlavor::Unknown),
        };

        Ok(Self {
            target_system,
            os,
            flavor,
        })
    }

    fn abi(&self, architecture: &str) -> Result<Option<Abi>, MetadataParseError> {
        let Some(os) = self.os else {
            return Ok(None);
        };

        let (arch, word_width) = match architecture {
            "x86" | "i386" => (Architecture::X86, 32),
            "x86_64" => (Architecture::X86, 64),
            "arm" => (Architecture::Arm, 32),
            "arm64" => (Architecture::Arm, 64),
            "riscv64" => (Architecture::RiscV, 64),
            "wasm" | "wasm32" => {
                return Ok(Some(Abi::new(
                    Architecture::Asmjs,
                    os,
                    self.flavor,
                    BinaryFormat::Emscripten,
                    32,
                )));
            }
            other => return Err(MetadataParseError::UnknownArchitecture(other.to_string())),
        };

        if os == Os::Unknown {
            return Err(MetadataParseError::UnknownOs(self.target_system.to_string()));
        }
        Ok(Some(Abi::new(
            arch,
            os,
            self.flavor,
            os.default_binary_format(),
            word_width,
        )))
    }
}

/// GNU-style compilers mean MSys; anything else is read as an MSVC version.
fn windows_flavor(compiler_id: &str, compiler_version: &str) -> OsFlavor {
    if matches!(compiler_id, "GNU" | "Clang") {
        return OsFlavor::WindowsMSys;
    }
    let version = VersionNumber::parse(compiler_version).unwrap_or_default();
    OsFlavor::from_msvc_compiler_version(version.major, version.minor)
}
