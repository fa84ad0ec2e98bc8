//! Integration tests for openmod-js-runtime.
//!
//! These tests cover:
//! - Bundle discovery and skip semantics
//! - Native asset provisioning against a mocked NuGet registry
//! - Provisioning idempotence and failure reporting

use openmod_js_runtime::provision::extract_payload;
use openmod_js_runtime::{
    discover_bundles, AssetProvisioner, AssetSpec, LibrarySearchPath, LoadOrder,
    NativeAssetProvisioner, NuGetRegistry, PreinstalledAsset, ProvisionError, ProvisioningState,
    ScriptBundle, ENTRY_FILE,
};
use semver::VersionReq;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ==============================================================================
// Test Fixture Helpers
// ==============================================================================

const PACKAGE: &str = "Engine.Native";
const RID: &str = "linux-x64";

/// Search path that records directories instead of touching the environment.
#[derive(Default)]
struct RecordingSearchPath {
    dirs: Mutex<Vec<PathBuf>>,
}

impl RecordingSearchPath {
    fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().unwrap().clone()
    }
}

impl LibrarySearchPath for RecordingSearchPath {
    fn add_search_path(&self, dir: &Path) -> Result<(), ProvisionError> {
        self.dirs.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }
}

fn create_bundle(dir: &Path, id: &str, entry: Option<&str>) -> PathBuf {
    let bundle_dir = dir.join(id);
    std::fs::create_dir_all(&bundle_dir).unwrap();
    if let Some(source) = entry {
        std::fs::write(bundle_dir.join("startup.js"), source).unwrap();
    }
    bundle_dir
}

fn nupkg(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn provisioner(
    server: &MockServer,
    native_dir: &Path,
    req: &str,
    state: Arc<ProvisioningState>,
    search_path: Arc<RecordingSearchPath>,
) -> NativeAssetProvisioner {
    let spec = AssetSpec::new(PACKAGE, VersionReq::parse(req).unwrap()).with_rid(RID);
    NativeAssetProvisioner::new(
        Arc::new(NuGetRegistry::new(server.uri())),
        spec,
        native_dir.to_path_buf(),
    )
    .with_state(state)
    .with_search_path(search_path)
}

async fn mount_versions(server: &MockServer, versions: &[&str], expected: u64) {
    Mock::given(method("GET"))
        .and(path("/engine.native/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "versions": versions,
        })))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_package(server: &MockServer, version: &str, body: Vec<u8>, expected: u64) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/engine.native/{version}/engine.native.{version}.nupkg"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(expected)
        .mount(server)
        .await;
}

// ==============================================================================
// Discovery
// ==============================================================================

#[test]
fn test_discover_mixed_directory() {
    let temp_dir = TempDir::new().unwrap();
    create_bundle(temp_dir.path(), "zeta", Some("1;"));
    create_bundle(temp_dir.path(), "alpha", Some("2;"));
    create_bundle(temp_dir.path(), "docs", None);

    let bundles = discover_bundles(temp_dir.path(), LoadOrder::Lexicographic).unwrap();
    let ids: Vec<_> = bundles.iter().map(|b| b.id.as_str().to_string()).collect();

    assert_eq!(ids, vec!["alpha", "zeta"]);
}

#[test]
fn test_bundle_paths() {
    let temp_dir = TempDir::new().unwrap();
    let dir = create_bundle(temp_dir.path(), "reader", Some("logger.info('x');"));

    let bundle = ScriptBundle::from_dir(&dir).unwrap();
    assert_eq!(bundle.entry, dir.join(ENTRY_FILE));
    assert_eq!(bundle.root, dir);
}

#[test]
fn test_entry_file_must_be_a_file() {
    let temp_dir = TempDir::new().unwrap();
    let dir = create_bundle(temp_dir.path(), "odd", None);
    std::fs::create_dir_all(dir.join("startup.js")).unwrap();

    assert!(ScriptBundle::from_dir(&dir).is_none());
}

#[test]
fn test_discover_missing_root_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = discover_bundles(&temp_dir.path().join("absent"), LoadOrder::Filesystem);
    assert!(result.is_err());
}

// ==============================================================================
// Provisioning
// ==============================================================================

#[tokio::test]
async fn test_provision_installs_payload() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let body = nupkg(&[
        ("runtimes/linux-x64/native/libengine.so", b"elf"),
        ("runtimes/osx-arm64/native/libengine.dylib", b"macho"),
    ]);
    mount_versions(&server, &["7.4.5", "7.5.0", "8.0.0"], 1).await;
    mount_package(&server, "7.5.0", body, 1).await;

    let search_path = Arc::new(RecordingSearchPath::default());
    let provisioner = provisioner(
        &server,
        temp_dir.path(),
        "^7",
        Arc::new(ProvisioningState::new()),
        Arc::clone(&search_path),
    );

    let installed = provisioner.ensure_provisioned().await.unwrap();

    assert_eq!(installed, temp_dir.path().join("engine.native").join("7.5.0"));
    assert_eq!(std::fs::read(installed.join("libengine.so")).unwrap(), b"elf");
    assert!(!installed.join("libengine.dylib").exists());
    assert_eq!(search_path.dirs(), vec![installed]);
}

#[tokio::test]
async fn test_provision_is_idempotent() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let body = nupkg(&[("runtimes/linux-x64/native/libengine.so", b"elf")]);
    mount_versions(&server, &["1.0.0"], 1).await;
    mount_package(&server, "1.0.0", body, 1).await;

    let search_path = Arc::new(RecordingSearchPath::default());
    let provisioner = provisioner(
        &server,
        temp_dir.path(),
        "*",
        Arc::new(ProvisioningState::new()),
        Arc::clone(&search_path),
    );

    let first = provisioner.ensure_provisioned().await.unwrap();
    let second = provisioner.ensure_provisioned().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(search_path.dirs().len(), 1);
    // MockServer verifies the expect(1) counts on drop.
}

#[tokio::test]
async fn test_provision_state_shared_across_provisioners() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let body = nupkg(&[("runtimes/linux-x64/native/libengine.so", b"elf")]);
    mount_versions(&server, &["1.0.0"], 1).await;
    mount_package(&server, "1.0.0", body, 1).await;

    let state = Arc::new(ProvisioningState::new());
    let search_path = Arc::new(RecordingSearchPath::default());

    // A reload cycle builds a fresh provisioner but keeps the state.
    for _ in 0..2 {
        let provisioner = provisioner(
            &server,
            temp_dir.path(),
            "*",
            Arc::clone(&state),
            Arc::clone(&search_path),
        );
        provisioner.ensure_provisioned().await.unwrap();
    }

    assert!(state.installed_path().await.is_some());
}

#[tokio::test]
async fn test_provision_concurrent_callers_fetch_once() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let body = nupkg(&[("runtimes/linux-x64/native/libengine.so", b"elf")]);
    mount_versions(&server, &["1.0.0"], 1).await;
    mount_package(&server, "1.0.0", body, 1).await;

    let provisioner = Arc::new(provisioner(
        &server,
        temp_dir.path(),
        "*",
        Arc::new(ProvisioningState::new()),
        Arc::new(RecordingSearchPath::default()),
    ));

    let a = tokio::spawn({
        let provisioner = Arc::clone(&provisioner);
        async move { provisioner.ensure_provisioned().await }
    });
    let b = tokio::spawn({
        let provisioner = Arc::clone(&provisioner);
        async move { provisioner.ensure_provisioned().await }
    });

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_provision_no_compatible_version() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    mount_versions(&server, &["1.0.0", "1.2.0"], 1).await;

    let provisioner = provisioner(
        &server,
        temp_dir.path(),
        "^2",
        Arc::new(ProvisioningState::new()),
        Arc::new(RecordingSearchPath::default()),
    );

    let result = provisioner.ensure_provisioned().await;
    assert!(matches!(
        result,
        Err(ProvisionError::NoCompatibleVersion { .. })
    ));
}

#[tokio::test]
async fn test_provision_unknown_package() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/engine.native/index.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let provisioner = provisioner(
        &server,
        temp_dir.path(),
        "*",
        Arc::new(ProvisioningState::new()),
        Arc::new(RecordingSearchPath::default()),
    );

    let result = provisioner.ensure_provisioned().await;
    assert!(matches!(
        result,
        Err(ProvisionError::NoCompatibleVersion { .. })
    ));
}

#[tokio::test]
async fn test_provision_registry_error() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/engine.native/index.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let state = Arc::new(ProvisioningState::new());
    let provisioner = provisioner(
        &server,
        temp_dir.path(),
        "*",
        Arc::clone(&state),
        Arc::new(RecordingSearchPath::default()),
    );

    let result = provisioner.ensure_provisioned().await;
    assert!(matches!(result, Err(ProvisionError::RegistryUnreachable(_))));
    assert!(state.installed_path().await.is_none());
}

#[tokio::test]
async fn test_provision_missing_platform_payload() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let body = nupkg(&[("runtimes/win-x64/native/engine.dll", b"pe")]);
    mount_versions(&server, &["1.0.0"], 1).await;
    mount_package(&server, "1.0.0", body, 1).await;

    let provisioner = provisioner(
        &server,
        temp_dir.path(),
        "*",
        Arc::new(ProvisioningState::new()),
        Arc::new(RecordingSearchPath::default()),
    );

    let result = provisioner.ensure_provisioned().await;
    assert!(matches!(result, Err(ProvisionError::MissingPayload { .. })));
}

#[tokio::test]
async fn test_provision_skips_download_when_installed() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    mount_versions(&server, &["1.0.0"], 1).await;
    mount_package(&server, "1.0.0", Vec::new(), 0).await;

    let installed = temp_dir.path().join("engine.native").join("1.0.0");
    std::fs::create_dir_all(&installed).unwrap();
    std::fs::write(installed.join("libengine.so"), b"elf").unwrap();

    let provisioner = provisioner(
        &server,
        temp_dir.path(),
        "*",
        Arc::new(ProvisioningState::new()),
        Arc::new(RecordingSearchPath::default()),
    );

    assert_eq!(provisioner.ensure_provisioned().await.unwrap(), installed);
}

#[tokio::test]
async fn test_preinstalled_asset() {
    let temp_dir = TempDir::new().unwrap();
    let native = temp_dir.path().join("native");
    let search_path = Arc::new(RecordingSearchPath::default());

    let asset = PreinstalledAsset::new(native.clone())
        .with_state(Arc::new(ProvisioningState::new()))
        .with_search_path(Arc::clone(&search_path) as Arc<dyn LibrarySearchPath>);

    assert_eq!(asset.ensure_provisioned().await.unwrap(), native);
    assert_eq!(asset.ensure_provisioned().await.unwrap(), native);
    assert!(native.is_dir());
    assert_eq!(search_path.dirs(), vec![native]);
}

#[test]
fn test_extract_payload_multiple_files() {
    let temp_dir = TempDir::new().unwrap();
    let body = nupkg(&[
        ("runtimes/linux-x64/native/libengine.so", b"a"),
        ("runtimes/linux-x64/native/libengine-helper.so", b"b"),
    ]);

    let files = extract_payload(&body, RID, temp_dir.path()).unwrap();
    assert_eq!(files.len(), 2);
}
