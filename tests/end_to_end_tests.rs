// End-to-end: a fake installation on PATH, discovered, resolved, persisted,
// reloaded and assigned to a kit

mod support;

use qtversions::models::{Abi, DeviceType, Subtype};
use qtversions::services::MetadataCache;
use qtversions::{Kit, KitAspect, RegistryEvent};
use std::sync::Arc;
use support::*;
use tempfile::TempDir;

#[tokio::test]
async fn test_universal_macos_installation() {
    let temp = TempDir::new().unwrap();
    let root = utf8_dir(&temp);
    let install = FakeInstallation::create_with_spec(
        &root.join("Qt/6.5.0/macos"),
        "6.5.0",
        "macx-clang",
        "QMAKE_PLATFORM = macos osx mac darwin unix posix\n",
    );
    install.write_library("libQt6Core.6.5.0.dylib", &fat_macho(&[CPU_X86_64, CPU_ARM64]));
    let runner = FakeRunner::new();
    install.register(&runner);
    let config_dir = root.join("config");
    let search_path = install.root.join("bin");

    let registry = Arc::new(registry(&config_dir, runner.clone(), &search_path));
    let mut events = registry.subscribe();
    registry.on_toolchains_loaded(Vec::new()).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), RegistryEvent::VersionsLoaded);
    assert_eq!(
        events.recv().await.unwrap(),
        RegistryEvent::VersionsChanged {
            added: vec![0],
            removed: vec![],
            changed: vec![],
        }
    );

    let versions = registry.versions();
    assert_eq!(versions.len(), 1);
    let version = &versions[0];
    assert_eq!(version.subtype(), Subtype::Desktop);
    assert!(version.is_valid(), "{:?}", version.invalid_reason());
    assert!(version.warning_reasons().is_empty());

    let x86: Abi = "x86-darwin-generic-mach_o-64bit".parse().unwrap();
    let arm: Abi = "arm-darwin-generic-mach_o-64bit".parse().unwrap();
    assert_eq!(version.abis_or_empty(), &[x86.clone(), arm.clone()]);

    let cache = MetadataCache::open(registry.config().metadata_cache_path().to_path_buf());
    assert!(cache.contains(&install.tool));
    assert_eq!(runner.calls(), 1);

    // Kits on either architecture pick the universal build.
    let aspect = KitAspect::new(registry.clone());
    aspect.set("intel", Some(0));
    aspect.set("apple-silicon", Some(0));
    assert_eq!(aspect.weight(&Kit::new("intel", DeviceType::Desktop).with_toolchain_abi(x86)), 2);
    assert_eq!(
        aspect.weight(&Kit::new("apple-silicon", DeviceType::Desktop).with_toolchain_abi(arm)),
        2
    );
    assert!(
        aspect
            .available_features(&Kit::new("intel", DeviceType::Desktop))
            .contains("QtSupport.Wizards.FeatureDesktop")
    );

    registry.shutdown();
    drop(aspect);
    drop(registry);

    // A second start restores from settings and answers from the cache.
    let reloaded = registry_restart(&config_dir, runner.clone(), &search_path).await;
    let restored = reloaded.version(0).unwrap();
    assert_eq!(restored.tool_path(), install.tool.as_path());
    assert_eq!(restored.detection_source(), "PATH");

    assert_eq!(reloaded.resolve_all().await.unwrap(), 1);
    let resolved = reloaded.version(0).unwrap();
    assert!(resolved.is_valid());
    assert_eq!(resolved.abis_or_empty().len(), 2);
    assert_eq!(runner.calls(), 1);
}

async fn registry_restart(
    config_dir: &camino::Utf8Path,
    runner: Arc<FakeRunner>,
    search_path: &camino::Utf8Path,
) -> qtversions::VersionRegistry {
    let registry = registry(config_dir, runner, search_path);
    registry.load().await.unwrap();
    registry
}
