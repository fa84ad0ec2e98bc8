//! # openmod-js-host
//!
//! Hosts JavaScript bundles inside an application.
//!
//! This crate provides:
//! - A service container with per-bundle child scopes
//! - A host-curated registry of type names scripts may request
//! - The `openmod` and `logger` capability globals
//! - [`ScriptHost`], which runs load passes over the scripts directory
//!
//! ## Guest API
//!
//! ```javascript
//! const clock = openmod.getRequiredService("Clock");
//! logger.info("Started at " + clock.now());
//!
//! const maybe = openmod.getService(openmod.getType("Economy")); // null if absent
//! ```
//!
//! ## Isolation
//!
//! Every bundle gets a fresh service scope, logger and engine. Services
//! registered for one bundle's scope are invisible to every other bundle,
//! and an error in one bundle never stops the rest of the pass.

pub mod bridge;
pub mod error;
pub mod host;
pub mod logging;
pub mod scope;
pub mod services;

pub use bridge::{OpenModFunctions, LOGGER_GLOBAL, SERVICES_GLOBAL};
pub use error::{HostError, HostResult, ServiceError};
pub use host::{BundleFailure, LoadReport, ScopeHook, ScriptHost, ScriptHostConfig};
pub use logging::{LogLevel, LogRecord, LogSink, MemoryLogSink, ScriptLogger, TracingLogSink};
pub use scope::CapabilityScope;
pub use services::{
    unknown_method, HostService, ScopedServiceResolver, ServiceCollection, ServiceContainer,
    ServiceScope, TypeHandle, TypeRef, TypeRegistry,
};
