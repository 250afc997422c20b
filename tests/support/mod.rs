//! Shared helpers for integration tests: a scripted query runner, a fake Qt
//! installation on disk and writers for minimal binary fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use qtversions::config::ConfigManager;
use qtversions::models::{EngineConfig, Environment, VersionRecord};
use qtversions::services::{PathScanner, ProcessOutput, ProcessRunner, QueryError};
use qtversions::{Metrics, VersionRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const DESKTOP_TAG: &str = "Qt4ProjectManager.QtVersion.Desktop";

/// Answers `-query` from a table keyed by tool path and counts every run.
#[derive(Default)]
pub struct FakeRunner {
    outputs: Mutex<HashMap<Utf8PathBuf, Vec<u8>>>,
    calls: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_output(&self, tool: &Utf8Path, output: impl Into<Vec<u8>>) {
        self.outputs
            .lock()
            .unwrap()
            .insert(tool.to_path_buf(), output.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        program: &Utf8Path,
        _args: &[String],
        _environment: &Environment,
        _timeout_duration: Duration,
    ) -> Result<ProcessOutput, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outputs.lock().unwrap().get(program) {
            Some(stdout) => Ok(ProcessOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            None => Err(QueryError::ProcessCrashed(program.to_string())),
        }
    }
}

pub fn utf8_dir(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
}

pub fn make_executable(path: &Utf8Path) {
    std::fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// A Qt installation tree with `bin/qmake`, headers, libraries and an mkspec.
pub struct FakeInstallation {
    pub root: Utf8PathBuf,
    pub tool: Utf8PathBuf,
    pub version: String,
    pub spec: String,
}

impl FakeInstallation {
    pub fn create(root: &Utf8Path, version: &str) -> Self {
        Self::create_with_spec(root, version, "linux-g++", "QMAKE_PLATFORM = linux unix posix\n")
    }

    pub fn create_with_spec(root: &Utf8Path, version: &str, spec: &str, qmake_conf: &str) -> Self {
        for dir in ["bin", "include", "lib", "doc"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        let spec_dir = root.join("mkspecs").join(spec);
        std::fs::create_dir_all(&spec_dir).unwrap();
        std::fs::write(spec_dir.join("qmake.conf"), qmake_conf).unwrap();
        std::fs::write(
            root.join("mkspecs/qconfig.pri"),
            "CONFIG += shared release\nQT_CONFIG += widgets\n",
        )
        .unwrap();

        let tool = root.join("bin/qmake");
        make_executable(&tool);

        Self {
            root: root.to_path_buf(),
            tool,
            version: version.to_string(),
            spec: spec.to_string(),
        }
    }

    /// What `qmake -query` prints for this tree.
    pub fn query_output(&self) -> String {
        let root = &self.root;
        format!(
            "QT_SYSROOT:\n\
             QT_INSTALL_PREFIX:{root}\n\
             QT_INSTALL_ARCHDATA:{root}\n\
             QT_INSTALL_DATA:{root}\n\
             QT_INSTALL_DOCS:{root}/doc\n\
             QT_INSTALL_HEADERS:{root}/include\n\
             QT_INSTALL_LIBS:{root}/lib\n\
             QT_INSTALL_BINS:{root}/bin\n\
             QT_INSTALL_DEMOS:**Unknown**\n\
             QT_HOST_PREFIX:{root}\n\
             QT_HOST_DATA:{root}\n\
             QT_HOST_BINS:{root}/bin\n\
             QMAKE_SPEC:{spec}\n\
             QMAKE_XSPEC:{spec}\n\
             QMAKE_VERSION:3.1\n\
             QT_VERSION:{version}\n",
            spec = self.spec,
            version = self.version,
        )
    }

    pub fn write_library(&self, name: &str, data: &[u8]) -> Utf8PathBuf {
        let path = self.root.join("lib").join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    pub fn register(&self, runner: &FakeRunner) {
        runner.set_output(&self.tool, self.query_output());
    }
}

/// Minimal little-endian ELF header.
pub fn elf_header(class: u8, machine: u16) -> Vec<u8> {
    let mut data = vec![0u8; 64];
    data[..4].copy_from_slice(b"\x7fELF");
    data[4] = class;
    data[5] = 1;
    data[6] = 1;
    data[18..20].copy_from_slice(&machine.to_le_bytes());
    data
}

pub fn elf_x86_64() -> Vec<u8> {
    elf_header(2, 62)
}

/// Fat Mach-O header with one slice per CPU type.
pub fn fat_macho(cpu_types: &[u32]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&0xcafe_babeu32.to_be_bytes());
    data.extend_from_slice(&(cpu_types.len() as u32).to_be_bytes());
    for (index, cpu) in cpu_types.iter().enumerate() {
        data.extend_from_slice(&cpu.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&(0x1000 * (index as u32 + 1)).to_be_bytes());
        data.extend_from_slice(&0x100u32.to_be_bytes());
        data.extend_from_slice(&12u32.to_be_bytes());
    }
    data
}

pub const CPU_X86_64: u32 = 0x0100_0007;
pub const CPU_ARM64: u32 = 0x0100_000c;

/// Build-banner bytes as embedded in a Qt core library.
pub fn banner_bytes(banner: &str) -> Vec<u8> {
    let mut data = vec![0u8; 512];
    data.extend_from_slice(banner.as_bytes());
    data.push(0);
    data.extend_from_slice(&[0u8; 256]);
    data
}

pub fn record(tool_path: &str, source: &str) -> VersionRecord {
    VersionRecord {
        id: None,
        name: String::new(),
        type_tag: DESKTOP_TAG.to_string(),
        tool_path: tool_path.to_string(),
        is_autodetected: !source.is_empty(),
        detection_source: source.to_string(),
        override_features: None,
        abis: None,
        extra: IndexMap::new(),
    }
}

/// A registry over `config_dir` whose `PATH` scan only sees `search_path`.
pub fn registry(
    config_dir: &Utf8Path,
    runner: Arc<FakeRunner>,
    search_path: &Utf8Path,
) -> VersionRegistry {
    let config = ConfigManager::new(config_dir).unwrap();
    let engine = EngineConfig {
        query_timeout_secs: 5,
        installer_debounce_ms: 100,
        ..EngineConfig::default()
    };
    let scanner = PathScanner::new(runner.clone(), Duration::from_secs(5))
        .with_search_path(search_path.as_std_path().as_os_str());
    VersionRegistry::build(config, &engine, runner, Arc::new(Metrics::new())).with_path_scanner(scanner)
}
