//! Integration tests for ConfigManager and the settings documents
//!
//! These tests verify:
//! - Engine config layering (defaults, YAML file, environment)
//! - User and installer settings round trips
//! - Unreadable documents being treated as absent
//! - Unknown record keys surviving a registry load/save cycle

mod support;

use camino::Utf8PathBuf;
use qtversions::models::{EngineConfig, VersionSettingsFile};
use qtversions::ConfigManager;
use std::fs;
use support::*;
use tempfile::TempDir;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = utf8_dir(&temp_dir);
    (temp_dir, config_path)
}

#[test]
fn test_create_config_manager() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let nested = config_path.join("a/b");
    let manager = ConfigManager::new(&nested).unwrap();

    assert!(nested.is_dir());
    assert_eq!(manager.config_dir(), nested.as_path());
    assert_eq!(manager.user_settings_path(), nested.join("qtversion.yaml").as_path());
    assert_eq!(
        manager.installer_settings_path(),
        nested.join("installer/qtversion.yaml").as_path()
    );
}

#[test]
fn test_engine_config_from_yaml_file() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();
    fs::write(
        manager.engine_config_path(),
        "query_timeout_secs: 12\n\
         log_dir: /var/log/qtversions\n\
         toolchains:\n  \
           - name: gcc\n    \
             abi: x86-linux-generic-elf-64bit\n",
    )
    .unwrap();

    let config = manager.load_engine_config_from(Some(config::Map::new())).unwrap();

    assert_eq!(config.query_timeout_secs, 12);
    assert_eq!(config.log_dir, "/var/log/qtversions");
    assert_eq!(config.installer_debounce_ms, EngineConfig::default().installer_debounce_ms);
    assert_eq!(config.toolchains.len(), 1);
    assert_eq!(config.toolchains[0].abi.to_string(), "x86-linux-generic-elf-64bit");
}

#[test]
fn test_environment_overrides_file() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();
    fs::write(manager.engine_config_path(), "query_timeout_secs: 12\n").unwrap();

    let mut env = config::Map::new();
    env.insert("QTVERSIONS_QUERY_TIMEOUT_SECS".to_string(), "3".to_string());
    let config = manager.load_engine_config_from(Some(env)).unwrap();

    assert_eq!(config.query_timeout_secs, 3);
}

#[test]
fn test_malformed_engine_config_is_an_error() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();
    fs::write(manager.engine_config_path(), "query_timeout_secs: [1, 2\n").unwrap();

    let error = manager.load_engine_config_from(Some(config::Map::new())).unwrap_err();
    assert!(format!("{:#}", error).contains("engine config"));
}

#[test]
fn test_engine_config_round_trip() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();
    let config = EngineConfig {
        query_timeout_secs: 9,
        debug_mode: true,
        installer_settings_path: Some("/srv/sdk/qtversion.yaml".to_string()),
        ..EngineConfig::default()
    };

    manager.save_engine_config(&config).unwrap();
    assert_eq!(manager.load_engine_config_from(Some(config::Map::new())).unwrap(), config);
}

#[test]
fn test_installer_path_override() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let mut manager = ConfigManager::new(&config_path).unwrap();
    let elsewhere = config_path.join("sdk/qtversion.yaml");

    manager.apply_engine_config(&EngineConfig {
        installer_settings_path: Some(elsewhere.to_string()),
        ..EngineConfig::default()
    });
    manager
        .save_installer_settings(&VersionSettingsFile::new(vec![record("/opt/qt/bin/qmake", "qt.650")]))
        .unwrap();

    assert!(elsewhere.exists());
    let loaded = manager.load_installer_settings().unwrap().unwrap();
    assert_eq!(loaded.versions[0].detection_source, "qt.650");
}

#[test]
fn test_user_settings_absent_states() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    assert!(manager.load_user_settings().unwrap().is_none());

    fs::write(manager.user_settings_path(), "FileVersion: 0\nVersions: []\n").unwrap();
    assert!(manager.load_user_settings().unwrap().is_none());

    fs::write(manager.user_settings_path(), ": : not yaml").unwrap();
    assert!(manager.load_user_settings().unwrap().is_none());

    fs::write(manager.user_settings_path(), "FileVersion: 1\n").unwrap();
    assert_eq!(manager.load_user_settings().unwrap(), Some(VersionSettingsFile::default()));
}

#[tokio::test]
async fn test_unknown_record_keys_survive_registry_round_trip() {
    let (_temp_dir, root) = create_test_config_dir();
    fs::create_dir_all(root.join("empty-path")).unwrap();
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("qtversion.yaml"),
        "FileVersion: 1\n\
         Versions:\n  \
           - Id: 3\n    \
             Name: Device Qt\n    \
             Type: RemoteLinux.EmbeddedLinuxQt\n    \
             QMakePath: /opt/device/bin/qmake\n    \
             DeviceSysroot: /opt/device/sysroot\n",
    )
    .unwrap();

    let registry = registry(&config_dir, FakeRunner::new(), &root.join("empty-path"));
    registry.load().await.unwrap();
    assert_eq!(registry.len(), 1);

    let saved = registry.config().load_user_settings().unwrap().unwrap();
    let record = &saved.versions[0];
    assert_eq!(record.id, Some(3));
    assert_eq!(record.type_tag, "RemoteLinux.EmbeddedLinuxQt");
    assert_eq!(
        record.extra.get("DeviceSysroot").and_then(|value| value.as_str()),
        Some("/opt/device/sysroot")
    );
}
