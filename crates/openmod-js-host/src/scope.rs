//! Per-bundle capability scope.

use crate::bridge::{self, OpenModFunctions};
use crate::logging::{LogSink, ScriptLogger};
use crate::services::{
    ScopedServiceResolver, ServiceCollection, ServiceContainer, ServiceScope, TypeRegistry,
};
use openmod_js_runtime::rquickjs::Ctx;
use openmod_js_runtime::{ScriptError, ScriptId};
use std::sync::Arc;
use tracing::debug;

/// Owns the service scope and capability objects of one bundle.
///
/// Created before the bundle's engine and dropped after it, so every
/// capability handed to guest code is backed by a live scope.
pub struct CapabilityScope {
    script_id: ScriptId,
    services: Arc<ServiceScope>,
    functions: Arc<OpenModFunctions>,
    logger: Arc<ScriptLogger>,
}

impl CapabilityScope {
    /// Open a child scope of `container` for `script_id`.
    pub fn begin<F>(
        script_id: ScriptId,
        container: &ServiceContainer,
        types: Arc<TypeRegistry>,
        sink: Arc<dyn LogSink>,
        configure: F,
    ) -> Self
    where
        F: FnOnce(&mut ServiceCollection),
    {
        let services = Arc::new(container.begin_scope(configure));
        let resolver = ScopedServiceResolver::new(Arc::clone(&services), types);
        let functions = Arc::new(OpenModFunctions::new(resolver));
        let logger = Arc::new(ScriptLogger::new(&script_id, sink));

        debug!(
            script = %script_id,
            "Opened capability scope with {} local service(s)",
            services.local_len()
        );

        Self {
            script_id,
            services,
            functions,
            logger,
        }
    }

    pub fn script_id(&self) -> &ScriptId {
        &self.script_id
    }

    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    pub fn functions(&self) -> &OpenModFunctions {
        &self.functions
    }

    pub fn logger(&self) -> &ScriptLogger {
        &self.logger
    }

    /// Inject this scope's capabilities into `ctx`.
    pub fn install(&self, ctx: &Ctx<'_>) -> Result<(), ScriptError> {
        bridge::install(ctx, Arc::clone(&self.functions), Arc::clone(&self.logger))
            .map_err(|e| ScriptError::Injection(e.to_string()))
    }
}

impl Drop for CapabilityScope {
    fn drop(&mut self) {
        debug!(script = %self.script_id, "Closed capability scope");
    }
}
