//! Script host: load passes over the scripts directory.
//!
//! A load pass provisions the native engine asset (once per process), then
//! runs every discovered bundle in order. Each bundle gets its own scope and
//! engine on a blocking worker; a failing bundle is logged and recorded in
//! the [`LoadReport`] without affecting the others.

use crate::error::{HostError, HostResult};
use crate::logging::{LogSink, TracingLogSink};
use crate::scope::CapabilityScope;
use crate::services::{ServiceCollection, ServiceContainer, TypeRegistry};
use openmod_js_runtime::bundle::ensure_dir;
use openmod_js_runtime::{
    discover_bundles, AssetProvisioner, EngineOptions, LoadOrder, ScriptBundle, ScriptEngine,
    ScriptError, ScriptId,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Registers bundle-local services when a bundle's scope is opened.
pub type ScopeHook = Arc<dyn Fn(&ScriptBundle, &mut ServiceCollection) + Send + Sync>;

/// Host settings.
#[derive(Debug, Clone)]
pub struct ScriptHostConfig {
    /// Scripts root; created if absent.
    pub scripts_dir: PathBuf,

    /// Order in which bundles run.
    pub load_order: LoadOrder,

    /// Limits applied to every engine.
    pub engine: EngineOptions,
}

impl ScriptHostConfig {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            load_order: LoadOrder::default(),
            engine: EngineOptions::default(),
        }
    }
}

/// A bundle that failed during a load pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFailure {
    pub script_id: ScriptId,
    pub cause: String,
}

/// Outcome of one load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Bundles whose entry file ran to completion, in execution order.
    pub completed: Vec<ScriptId>,

    /// Bundles that failed, in execution order.
    pub failed: Vec<BundleFailure>,
}

impl LoadReport {
    /// Total bundles attempted.
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    pub fn failure(&self, id: &str) -> Option<&BundleFailure> {
        self.failed.iter().find(|f| f.script_id.as_str() == id)
    }
}

/// Hosts JavaScript bundles for an application.
pub struct ScriptHost {
    config: ScriptHostConfig,
    provisioner: Arc<dyn AssetProvisioner>,
    container: ServiceContainer,
    types: Arc<TypeRegistry>,
    sink: Arc<dyn LogSink>,
    scope_hook: Option<ScopeHook>,
    loaded: RwLock<Vec<ScriptId>>,
}

impl ScriptHost {
    /// Create a host that logs script output through `tracing`.
    pub fn new(
        config: ScriptHostConfig,
        provisioner: Arc<dyn AssetProvisioner>,
        container: ServiceContainer,
        types: TypeRegistry,
    ) -> Self {
        Self {
            config,
            provisioner,
            container,
            types: Arc::new(types),
            sink: Arc::new(TracingLogSink),
            scope_hook: None,
            loaded: RwLock::new(Vec::new()),
        }
    }

    /// Send script output to `sink` instead.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register bundle-local services through `hook`.
    pub fn with_scope_hook(mut self, hook: ScopeHook) -> Self {
        self.scope_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &ScriptHostConfig {
        &self.config
    }

    /// Scripts that completed in the last load pass.
    pub async fn loaded_scripts(&self) -> Vec<ScriptId> {
        self.loaded.read().await.clone()
    }

    /// Run one load pass.
    ///
    /// Fails only when the scripts directory cannot be prepared or the
    /// native asset is unavailable; in the latter case no bundle runs.
    pub async fn on_load(&self) -> HostResult<LoadReport> {
        let dir = &self.config.scripts_dir;
        ensure_dir(dir)?;

        match self.provisioner.ensure_provisioned().await {
            Ok(path) => debug!("Native engine asset available at {:?}", path),
            Err(e) => {
                error!("Native engine asset unavailable, no scripts will run: {}", e);
                return Err(HostError::Provision(e));
            }
        }

        let bundles = discover_bundles(dir, self.config.load_order)?;
        info!("Loading {} script(s) from {:?}", bundles.len(), dir);

        let mut report = LoadReport::default();
        for bundle in bundles {
            let id = bundle.id.clone();
            match self.run_bundle(bundle).await {
                Ok(()) => {
                    info!(script = %id, "Loaded script {}", id);
                    report.completed.push(id);
                }
                Err(e) => {
                    error!(script = %id, "Script error in script \"{}\": {}", id, e);
                    report.failed.push(BundleFailure {
                        script_id: id,
                        cause: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Load pass finished: {} completed, {} failed",
            report.completed.len(),
            report.failed.len()
        );
        *self.loaded.write().await = report.completed.clone();
        Ok(report)
    }

    /// Forget the scripts of the last pass.
    pub async fn teardown(&self) {
        let mut loaded = self.loaded.write().await;
        info!("Unloading {} script(s)", loaded.len());
        loaded.clear();
    }

    async fn run_bundle(&self, bundle: ScriptBundle) -> Result<(), ScriptError> {
        let container = self.container.clone();
        let types = Arc::clone(&self.types);
        let sink = Arc::clone(&self.sink);
        let hook = self.scope_hook.clone();
        let options = self.config.engine.clone();

        tokio::task::spawn_blocking(move || {
            execute_bundle(&bundle, &container, types, sink, hook, options)
        })
        .await
        .map_err(|e| ScriptError::Panicked(join_error_message(e)))?
    }
}

/// Scope, engine, capabilities, then the entry file. The engine is dropped
/// before the scope.
fn execute_bundle(
    bundle: &ScriptBundle,
    container: &ServiceContainer,
    types: Arc<TypeRegistry>,
    sink: Arc<dyn LogSink>,
    hook: Option<ScopeHook>,
    options: EngineOptions,
) -> Result<(), ScriptError> {
    let scope = CapabilityScope::begin(bundle.id.clone(), container, types, sink, |services| {
        if let Some(hook) = &hook {
            hook(bundle, services);
        }
    });

    let engine = ScriptEngine::new(bundle.id.as_str(), options)?;
    engine.enable_module_imports(&bundle.root)?;
    engine.context().with(|ctx| scope.install(&ctx))?;

    debug!(script = %bundle.id, "Executing {:?}", bundle.entry);
    let result = engine.execute_file(&bundle.entry);

    drop(engine);
    drop(scope);
    result
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
