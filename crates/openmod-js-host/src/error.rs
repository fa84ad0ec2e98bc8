//! Error types for the script host.

use openmod_js_runtime::{ProvisionError, RuntimeError};
use thiserror::Error;

/// Errors raised while resolving services for guest code.
///
/// The guest-facing variants are thrown into the script as JS errors; their
/// messages start with the error name so scripts can match on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No exposed type carries this name.
    #[error("UnknownTypeName: no exposed type is named '{0}'")]
    UnknownTypeName(String),

    /// The type is known but no service is registered for it in this scope.
    #[error("ServiceNotFoundError: no service registered for type '{0}'")]
    ServiceNotFound(String),

    /// A type name was exposed twice for different types.
    #[error("DuplicateTypeName: '{0}' is already exposed for another type")]
    DuplicateTypeName(String),

    /// The service does not declare the called method.
    #[error("UnknownMethod: {service} has no method '{method}'")]
    UnknownMethod { service: String, method: String },

    /// The service itself failed.
    #[error("{0}")]
    Invocation(String),
}

/// Errors that abort a whole load pass.
#[derive(Error, Debug)]
pub enum HostError {
    /// The native engine asset is unavailable.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The scripts directory could not be prepared or read.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Result type for host-wide operations.
pub type HostResult<T> = std::result::Result<T, HostError>;
