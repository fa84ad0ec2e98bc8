//! Error types for the script runtime.

use thiserror::Error;

/// Errors raised while discovering bundles or preparing directories.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Scripts root could not be created or read.
    #[error("Scripts directory error: {0}")]
    ScriptsDirectory(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while provisioning the engine's native runtime asset.
///
/// Any of these is fatal for a whole load pass: no engine may be built
/// without the asset.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The package registry could not be reached or answered with an error.
    #[error("Package registry unreachable: {0}")]
    RegistryUnreachable(String),

    /// No published version satisfies the requirement.
    #[error("No compatible version of {package} matches {requirement}")]
    NoCompatibleVersion {
        package: String,
        requirement: String,
    },

    /// The package has no payload for this platform.
    #[error("Package {package} {version} has no native payload for {rid}")]
    MissingPayload {
        package: String,
        version: String,
        rid: String,
    },

    /// The package archive could not be read.
    #[error("Failed to extract package: {0}")]
    Extraction(String),

    /// The library loader could not be pointed at the native directory.
    #[error("Failed to configure library search path: {0}")]
    SearchPath(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive error.
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<reqwest::Error> for ProvisionError {
    fn from(err: reqwest::Error) -> Self {
        ProvisionError::RegistryUnreachable(err.to_string())
    }
}

/// Failure of a single bundle. Contained at the bundle boundary.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The engine runtime or context could not be created.
    #[error("Engine construction failed: {0}")]
    Engine(String),

    /// Capability objects could not be injected into the guest globals.
    #[error("Capability injection failed: {0}")]
    Injection(String),

    /// Parse or runtime error raised by guest code.
    #[error("Script execution failed: {0}")]
    Execution(String),

    /// The execution budget ran out.
    #[error("Script exceeded its {timeout_ms}ms execution budget")]
    Timeout { timeout_ms: u64 },

    /// The worker running the bundle panicked.
    #[error("Script worker panicked: {0}")]
    Panicked(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
