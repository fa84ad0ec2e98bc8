//! # openmod-js-runtime
//!
//! Engine-level building blocks for hosting JavaScript extensions.
//!
//! This crate provides:
//! - Script bundle discovery from the scripts directory
//! - One-time provisioning of the engine's native runtime asset
//! - An isolated QuickJS engine per bundle, with execution limits
//!
//! ## Bundle Structure
//!
//! Bundles are directories under the scripts root containing:
//! - `startup.js` - Entry file, evaluated once per load pass
//! - any other files the script reads itself
//!
//! ## Isolation Model
//!
//! Every bundle gets its own QuickJS runtime. Guest code only reaches host
//! functionality through objects the host injects before the entry file runs.

pub mod bundle;
pub mod engine;
pub mod error;
pub mod provision;

pub use bundle::{discover_bundles, LoadOrder, ScriptBundle, ScriptId, ENTRY_FILE};
pub use engine::{EngineOptions, ScriptEngine};
pub use error::{ProvisionError, RuntimeError, RuntimeResult, ScriptError};
pub use provision::{
    AssetProvisioner, AssetSpec, EnvLibrarySearchPath, LibrarySearchPath, NativeAssetProvisioner,
    NuGetRegistry, PackageRegistry, PreinstalledAsset, ProvisioningState,
};

// Re-export rquickjs for crates that inject host objects into a context.
pub use rquickjs;
