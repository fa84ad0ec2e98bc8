//! The JavaScript plugin: wires the configuration into a [`ScriptHost`].
//!
//! Host-wide services exposed to every script:
//! - `HostInfo`: `name()`, `version()`, `workingDirectory()`
//!
//! Registered per bundle:
//! - `ScriptInfo`: `id()`, `directory()`

use crate::config::Config;
use anyhow::{Context, Result};
use openmod_js_host::{
    unknown_method, HostService, LoadReport, ScriptHost, ScriptHostConfig, ServiceCollection,
    ServiceContainer, ServiceError, TypeRegistry,
};
use openmod_js_runtime::{
    AssetProvisioner, AssetSpec, NativeAssetProvisioner, NuGetRegistry, PreinstalledAsset,
    ScriptBundle,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Facts about the host process.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub name: String,
    pub version: String,
    pub working_directory: PathBuf,
}

impl HostService for HostInfo {
    fn methods(&self) -> &[&'static str] {
        &["name", "version", "workingDirectory"]
    }

    fn invoke(&self, method: &str, _args: &[Value]) -> Result<Value, ServiceError> {
        match method {
            "name" => Ok(json!(self.name)),
            "version" => Ok(json!(self.version)),
            "workingDirectory" => Ok(json!(self.working_directory.display().to_string())),
            other => Err(unknown_method("HostInfo", other)),
        }
    }
}

/// Facts about the bundle the calling script belongs to.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    pub id: String,
    pub directory: PathBuf,
}

impl ScriptInfo {
    fn for_bundle(bundle: &ScriptBundle) -> Self {
        Self {
            id: bundle.id.to_string(),
            directory: bundle.root.clone(),
        }
    }
}

impl HostService for ScriptInfo {
    fn methods(&self) -> &[&'static str] {
        &["id", "directory"]
    }

    fn invoke(&self, method: &str, _args: &[Value]) -> Result<Value, ServiceError> {
        match method {
            "id" => Ok(json!(self.id)),
            "directory" => Ok(json!(self.directory.display().to_string())),
            other => Err(unknown_method("ScriptInfo", other)),
        }
    }
}

/// Loads and unloads the configured script bundles.
pub struct JavaScriptPlugin {
    host: ScriptHost,
}

impl JavaScriptPlugin {
    /// Build the plugin with the provisioner the configuration asks for.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provisioner = provisioner(config)?;
        Self::with_provisioner(config, provisioner)
    }

    /// Build the plugin with an explicit provisioner.
    pub fn with_provisioner(
        config: &Config,
        provisioner: Arc<dyn AssetProvisioner>,
    ) -> Result<Self> {
        let working_directory = config.working_directory()?;
        let (container, types) = host_services(working_directory)?;

        let host_config = ScriptHostConfig {
            scripts_dir: config.scripts_dir()?,
            load_order: config.load_order(),
            engine: config.engine_options(),
        };

        let host = ScriptHost::new(host_config, provisioner, container, types).with_scope_hook(
            Arc::new(|bundle: &ScriptBundle, services: &mut ServiceCollection| {
                services.add(Arc::new(ScriptInfo::for_bundle(bundle)));
            }),
        );

        Ok(Self { host })
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    /// Run a load pass.
    pub async fn load(&self) -> Result<LoadReport> {
        let report = self
            .host
            .on_load()
            .await
            .context("Failed to load JavaScript scripts")?;

        info!(
            "Loaded {} script(s), {} failed",
            report.completed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn unload(&self) {
        self.host.teardown().await;
    }
}

/// Registry-backed provisioner when `native.enabled`, otherwise the native
/// directory as installed.
pub fn provisioner(config: &Config) -> Result<Arc<dyn AssetProvisioner>> {
    let native_dir = config.native_dir()?;

    if !config.native.enabled {
        return Ok(Arc::new(PreinstalledAsset::new(native_dir)));
    }

    let spec = AssetSpec::new(config.native.package.clone(), config.version_req()?);
    let registry = Arc::new(NuGetRegistry::new(config.native.registry_url.clone()));
    Ok(Arc::new(NativeAssetProvisioner::new(registry, spec, native_dir)))
}

fn host_services(working_directory: PathBuf) -> Result<(ServiceContainer, TypeRegistry)> {
    let mut types = TypeRegistry::new();
    types.register::<HostInfo>()?;
    types.register::<ScriptInfo>()?;

    let mut services = ServiceCollection::new();
    services.add(Arc::new(HostInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        working_directory,
    }));

    Ok((services.build(), types))
}
