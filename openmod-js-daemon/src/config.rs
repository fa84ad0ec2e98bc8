//! Configuration file loading and management
//!
//! This module handles loading and parsing the daemon configuration from
//! `$XDG_CONFIG_HOME/openmod-js/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use openmod_js_runtime::{EngineOptions, LoadOrder};
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Host process configuration
    #[serde(default)]
    pub host: HostConfig,
    /// Script discovery and execution limits
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Native engine asset provisioning
    #[serde(default)]
    pub native: NativeConfig,
}

/// Host process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Working directory holding scripts and native assets
    /// If None, uses XDG_DATA_HOME/openmod-js
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
}

/// Script discovery and execution limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Scripts root, relative to the working directory
    /// Default: "scripts"
    pub directory: PathBuf,
    /// Bundle order (lexicographic, filesystem)
    /// Default: "lexicographic"
    pub load_order: String,
    /// Execution budget per bundle in milliseconds, 0 disables
    /// Default: 5000
    pub timeout_ms: u64,
    /// Heap limit per bundle in MiB, 0 disables
    /// Default: 64
    pub memory_limit_mb: usize,
    /// Stack limit per bundle in KiB, 0 disables
    /// Default: 1024
    pub max_stack_kb: usize,
}

/// Native engine asset provisioning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NativeConfig {
    /// Native asset directory, relative to the working directory
    /// Default: "native"
    pub directory: PathBuf,
    /// Fetch the asset from the package registry
    /// Default: false
    pub enabled: bool,
    /// NuGet flat-container base URL
    pub registry_url: String,
    /// Package id holding the native payload
    pub package: String,
    /// Semver requirement for the package version
    /// Default: "*"
    pub version_req: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            working_directory: None,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("scripts"),
            load_order: "lexicographic".to_string(),
            timeout_ms: 5000,
            memory_limit_mb: 64,
            max_stack_kb: 1024,
        }
    }
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(openmod_js_runtime::provision::NATIVE_DIR),
            enabled: false,
            registry_url: openmod_js_runtime::NuGetRegistry::DEFAULT_URL.to_string(),
            package: String::new(),
            version_req: "*".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/openmod-js/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        r#"# OpenMod JavaScript Host Configuration
# This file configures the openmod-js-daemon behavior.

[host]
# Working directory holding the scripts and native asset directories
# If not specified, defaults to $XDG_DATA_HOME/openmod-js
# working_directory = "/path/to/openmod"

# Log level: trace, debug, info, warn, error
# RUST_LOG takes precedence when set
# Default: "info"
log_level = "info"

[scripts]
# Scripts root, relative to the working directory
# Every subdirectory containing a startup.js is a script bundle
directory = "scripts"

# Order bundles run in: lexicographic, filesystem
# Default: "lexicographic"
load_order = "lexicographic"

# Execution limits per bundle (0 disables a limit)
timeout_ms = 5000
memory_limit_mb = 64
max_stack_kb = 1024

[native]
# Native engine asset directory, relative to the working directory
directory = "native"

# Fetch the native asset from a NuGet registry on first load
# When disabled, the directory is used as-is
enabled = false
registry_url = "https://api.nuget.org/v3-flatcontainer"

# Package holding runtimes/<rid>/native/* and the accepted versions
# package = "Vendor.Engine.Native"
# version_req = "^1.0"
"#
        .to_string()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                valid_log_levels.join(", ")
            );
        }

        if LoadOrder::parse(&self.scripts.load_order).is_none() {
            anyhow::bail!(
                "Invalid scripts.load_order: {}. Must be one of: lexicographic, filesystem",
                self.scripts.load_order
            );
        }

        if self.native.enabled {
            if self.native.package.trim().is_empty() {
                anyhow::bail!("native.package must be set when native.enabled is true");
            }
            self.version_req()?;
        }

        Ok(())
    }

    /// Get the working directory
    ///
    /// Returns the configured directory or the default XDG data directory
    pub fn working_directory(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.host.working_directory {
            return Ok(dir.clone());
        }
        Ok(project_dirs()?.data_dir().to_path_buf())
    }

    pub fn scripts_dir(&self) -> Result<PathBuf> {
        Ok(self.working_directory()?.join(&self.scripts.directory))
    }

    pub fn native_dir(&self) -> Result<PathBuf> {
        Ok(self.working_directory()?.join(&self.native.directory))
    }

    pub fn load_order(&self) -> LoadOrder {
        LoadOrder::parse(&self.scripts.load_order).unwrap_or_default()
    }

    pub fn version_req(&self) -> Result<VersionReq> {
        VersionReq::parse(&self.native.version_req)
            .with_context(|| format!("Invalid native.version_req: {}", self.native.version_req))
    }

    /// Engine limits, with zero meaning unlimited
    pub fn engine_options(&self) -> EngineOptions {
        let scripts = &self.scripts;
        let enabled = |value: usize| (value > 0).then_some(value);
        EngineOptions {
            timeout: (scripts.timeout_ms > 0).then(|| Duration::from_millis(scripts.timeout_ms)),
            memory_limit: enabled(scripts.memory_limit_mb).map(|mb| mb * 1024 * 1024),
            max_stack_size: enabled(scripts.max_stack_kb).map(|kb| kb * 1024),
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "openmod", "openmod-js")
        .context("Failed to determine project directories")
}
