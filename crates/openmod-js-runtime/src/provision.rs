//! One-time provisioning of the engine's native runtime asset.
//!
//! The first load pass in a process resolves the newest package version
//! matching the configured requirement, downloads it, extracts the payload
//! for the current platform into the native directory and points the
//! library loader at it. Every later pass gets the cached path back.
//!
//! Packages follow the NuGet layout: platform payloads live under
//! `runtimes/<rid>/native/` inside the archive.

use crate::error::ProvisionError;
use async_trait::async_trait;
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::ffi::OsString;
use std::future::Future;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Default directory name for native assets, relative to the host's
/// working directory.
pub const NATIVE_DIR: &str = "native";

/// Runtime identifier of the current platform, e.g. `linux-x64`.
pub fn runtime_identifier() -> String {
    let os = match std::env::consts::OS {
        "macos" => "osx",
        "windows" => "win",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{os}-{arch}")
}

/// Which package to provision and for which platform.
#[derive(Debug, Clone)]
pub struct AssetSpec {
    pub package: String,
    pub version_req: VersionReq,
    pub rid: String,
}

impl AssetSpec {
    /// Spec for the current platform.
    pub fn new(package: impl Into<String>, version_req: VersionReq) -> Self {
        Self {
            package: package.into(),
            version_req,
            rid: runtime_identifier(),
        }
    }

    /// Override the runtime identifier.
    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = rid.into();
        self
    }
}

/// A source of versioned native packages.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// All published versions of a package. Unknown packages have none.
    async fn versions(&self, package: &str) -> Result<Vec<Version>, ProvisionError>;

    /// Raw archive bytes of one package version.
    async fn download(&self, package: &str, version: &Version) -> Result<Vec<u8>, ProvisionError>;
}

/// Registry speaking the NuGet v3 flat-container protocol.
pub struct NuGetRegistry {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct VersionIndex {
    versions: Vec<String>,
}

impl NuGetRegistry {
    /// Public nuget.org flat container.
    pub const DEFAULT_URL: &'static str = "https://api.nuget.org/v3-flatcontainer";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for NuGetRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_URL)
    }
}

#[async_trait]
impl PackageRegistry for NuGetRegistry {
    async fn versions(&self, package: &str) -> Result<Vec<Version>, ProvisionError> {
        let id = package.to_lowercase();
        let url = format!("{}/{}/index.json", self.base_url, id);
        debug!("Querying package versions from {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let index: VersionIndex = response.error_for_status()?.json().await?;
        let versions = index
            .versions
            .iter()
            .filter_map(|v| match Version::parse(v) {
                Ok(version) => Some(version),
                Err(_) => {
                    debug!("Ignoring non-semver version {} of {}", v, package);
                    None
                }
            })
            .collect();

        Ok(versions)
    }

    async fn download(&self, package: &str, version: &Version) -> Result<Vec<u8>, ProvisionError> {
        let id = package.to_lowercase();
        let url = format!("{}/{id}/{version}/{id}.{version}.nupkg", self.base_url);
        info!("Downloading {} {} from {}", package, version, url);

        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Pick the highest version satisfying `req`.
pub fn select_version(versions: &[Version], req: &VersionReq) -> Option<Version> {
    versions.iter().filter(|v| req.matches(v)).max().cloned()
}

/// Extract every `runtimes/<rid>/native/*` entry of a package archive into
/// `dest`. Only file names are kept, so entries cannot escape `dest`.
pub fn extract_payload(
    archive: &[u8],
    rid: &str,
    dest: &Path,
) -> Result<Vec<PathBuf>, ProvisionError> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;
    let prefix = format!("runtimes/{}/native/", rid);
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(file_name) = Path::new(rest).file_name() else {
            continue;
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| ProvisionError::Extraction(format!("{}: {}", name, e)))?;

        std::fs::create_dir_all(dest)?;
        let target = dest.join(file_name);
        std::fs::write(&target, data)?;
        debug!("Extracted {} to {:?}", name, target);
        extracted.push(target);
    }

    Ok(extracted)
}

/// Points the engine's library loader at a directory.
pub trait LibrarySearchPath: Send + Sync {
    fn add_search_path(&self, dir: &Path) -> Result<(), ProvisionError>;
}

/// Process-wide list of native asset directories for the platform's
/// dynamic library path variable.
///
/// The platform loader reads that variable once at process start, and
/// writing the environment from a multi-threaded runtime is racy, so this
/// process's environment is never modified. Directories are recorded here
/// and handed to child processes through [`EnvLibrarySearchPath::apply_to`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvLibrarySearchPath;

fn search_dirs() -> &'static RwLock<Vec<PathBuf>> {
    static DIRS: OnceLock<RwLock<Vec<PathBuf>>> = OnceLock::new();
    DIRS.get_or_init(|| RwLock::new(Vec::new()))
}

impl EnvLibrarySearchPath {
    /// Name of the variable consulted by the platform loader.
    pub fn variable() -> &'static str {
        if cfg!(target_os = "windows") {
            "PATH"
        } else if cfg!(target_os = "macos") {
            "DYLD_LIBRARY_PATH"
        } else {
            "LD_LIBRARY_PATH"
        }
    }

    /// Directories recorded so far, most recent first.
    pub fn directories() -> Vec<PathBuf> {
        search_dirs()
            .read()
            .map(|dirs| dirs.clone())
            .unwrap_or_default()
    }

    /// Recorded directories followed by the inherited value of the variable.
    pub fn value() -> Result<OsString, ProvisionError> {
        let mut paths = Self::directories();
        if let Some(existing) = std::env::var_os(Self::variable()) {
            for path in std::env::split_paths(&existing) {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        std::env::join_paths(paths).map_err(|e| ProvisionError::SearchPath(e.to_string()))
    }

    /// Set the variable on a child process about to be spawned.
    pub fn apply_to(command: &mut Command) -> Result<(), ProvisionError> {
        command.env(Self::variable(), Self::value()?);
        Ok(())
    }
}

impl LibrarySearchPath for EnvLibrarySearchPath {
    fn add_search_path(&self, dir: &Path) -> Result<(), ProvisionError> {
        let mut dirs = search_dirs()
            .write()
            .map_err(|e| ProvisionError::SearchPath(e.to_string()))?;
        if dirs.iter().any(|d| d == dir) {
            return Ok(());
        }

        dirs.insert(0, dir.to_path_buf());
        debug!("Added {:?} to the {} search list", dir, Self::variable());
        Ok(())
    }
}

/// Holds the installed path once provisioning has succeeded.
///
/// Check-and-set runs under an async mutex, so concurrent load passes
/// provision at most once. Failures are not cached; the next pass retries.
#[derive(Debug, Default)]
pub struct ProvisioningState {
    installed: Mutex<Option<PathBuf>>,
}

impl ProvisioningState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state shared by every provisioner in this process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ProvisioningState>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ProvisioningState::new())))
    }

    /// The installed path, if provisioning already happened.
    pub async fn installed_path(&self) -> Option<PathBuf> {
        self.installed.lock().await.clone()
    }

    /// Forget the installed path.
    pub async fn reset(&self) {
        *self.installed.lock().await = None;
    }

    /// Return the cached path, or run `provision` and cache its result.
    pub async fn get_or_provision<F, Fut>(&self, provision: F) -> Result<PathBuf, ProvisionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PathBuf, ProvisionError>>,
    {
        let mut installed = self.installed.lock().await;
        if let Some(path) = installed.as_ref() {
            return Ok(path.clone());
        }

        let path = provision().await?;
        *installed = Some(path.clone());
        Ok(path)
    }
}

/// Makes the native runtime asset available before any engine is built.
#[async_trait]
pub trait AssetProvisioner: Send + Sync {
    async fn ensure_provisioned(&self) -> Result<PathBuf, ProvisionError>;
}

/// Fetches the native asset from a package registry.
pub struct NativeAssetProvisioner {
    registry: Arc<dyn PackageRegistry>,
    spec: AssetSpec,
    native_dir: PathBuf,
    state: Arc<ProvisioningState>,
    search_path: Arc<dyn LibrarySearchPath>,
}

impl NativeAssetProvisioner {
    /// Create a provisioner sharing the process-wide state.
    pub fn new(registry: Arc<dyn PackageRegistry>, spec: AssetSpec, native_dir: PathBuf) -> Self {
        Self {
            registry,
            spec,
            native_dir,
            state: ProvisioningState::global(),
            search_path: Arc::new(EnvLibrarySearchPath),
        }
    }

    pub fn with_state(mut self, state: Arc<ProvisioningState>) -> Self {
        self.state = state;
        self
    }

    pub fn with_search_path(mut self, search_path: Arc<dyn LibrarySearchPath>) -> Self {
        self.search_path = search_path;
        self
    }

    async fn provision(&self) -> Result<PathBuf, ProvisionError> {
        let spec = &self.spec;
        let versions = self.registry.versions(&spec.package).await?;
        let version = select_version(&versions, &spec.version_req).ok_or_else(|| {
            ProvisionError::NoCompatibleVersion {
                package: spec.package.clone(),
                requirement: spec.version_req.to_string(),
            }
        })?;

        let install_dir = self
            .native_dir
            .join(spec.package.to_lowercase())
            .join(version.to_string());

        if has_files(&install_dir) {
            info!(
                "Native asset {} {} already present at {:?}",
                spec.package, version, install_dir
            );
        } else {
            let archive = self.registry.download(&spec.package, &version).await?;
            let extracted = extract_payload(&archive, &spec.rid, &install_dir)?;
            if extracted.is_empty() {
                return Err(ProvisionError::MissingPayload {
                    package: spec.package.clone(),
                    version: version.to_string(),
                    rid: spec.rid.clone(),
                });
            }
            info!(
                "Installed {} native file(s) of {} {} into {:?}",
                extracted.len(),
                spec.package,
                version,
                install_dir
            );
        }

        self.search_path.add_search_path(&install_dir)?;
        Ok(install_dir)
    }
}

#[async_trait]
impl AssetProvisioner for NativeAssetProvisioner {
    async fn ensure_provisioned(&self) -> Result<PathBuf, ProvisionError> {
        self.state.get_or_provision(|| self.provision()).await
    }
}

/// For engines whose runtime is linked in or installed out of band: only
/// makes sure the native directory exists and is searchable.
pub struct PreinstalledAsset {
    dir: PathBuf,
    state: Arc<ProvisioningState>,
    search_path: Arc<dyn LibrarySearchPath>,
}

impl PreinstalledAsset {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            state: ProvisioningState::global(),
            search_path: Arc::new(EnvLibrarySearchPath),
        }
    }

    pub fn with_state(mut self, state: Arc<ProvisioningState>) -> Self {
        self.state = state;
        self
    }

    pub fn with_search_path(mut self, search_path: Arc<dyn LibrarySearchPath>) -> Self {
        self.search_path = search_path;
        self
    }
}

#[async_trait]
impl AssetProvisioner for PreinstalledAsset {
    async fn ensure_provisioned(&self) -> Result<PathBuf, ProvisionError> {
        self.state
            .get_or_provision(|| async {
                std::fs::create_dir_all(&self.dir)?;
                if !has_files(&self.dir) {
                    warn!("Native directory {:?} is empty", self.dir);
                }
                self.search_path.add_search_path(&self.dir)?;
                Ok::<_, ProvisionError>(self.dir.clone())
            })
            .await
    }
}

fn has_files(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
