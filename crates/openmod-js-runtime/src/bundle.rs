//! Script bundle discovery.
//!
//! A bundle is an immediate subdirectory of the scripts root that contains
//! a `startup.js` entry file. Directories without the entry file are
//! skipped without being reported as errors.
//!
//! ```text
//! scripts/
//! ├── welcome/
//! │   └── startup.js      <- bundle "welcome"
//! ├── economy/
//! │   ├── startup.js      <- bundle "economy"
//! │   └── prices.json
//! └── notes/              <- skipped, no entry file
//! ```

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the entry file every bundle must contain.
pub const ENTRY_FILE: &str = "startup.js";

/// Identifier of a script, derived from its bundle directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log channel that carries this script's output.
    pub fn log_channel(&self) -> String {
        format!("Script[{}]", self.0)
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order in which a load pass visits bundles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrder {
    /// Sorted by script id.
    #[default]
    Lexicographic,
    /// Whatever order the filesystem enumerates directories in.
    Filesystem,
}

impl LoadOrder {
    /// Parse a load order from its configuration name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lexicographic" => Some(LoadOrder::Lexicographic),
            "filesystem" => Some(LoadOrder::Filesystem),
            _ => None,
        }
    }
}

/// A discovered script bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBundle {
    /// Script id (the directory name).
    pub id: ScriptId,

    /// Bundle root directory.
    pub root: PathBuf,

    /// Path to the entry file.
    pub entry: PathBuf,
}

impl ScriptBundle {
    /// Inspect a directory, returning a bundle if it has an entry file.
    pub fn from_dir(dir: &Path) -> Option<Self> {
        let entry = dir.join(ENTRY_FILE);
        if !entry.is_file() {
            return None;
        }

        let id = dir.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            id: ScriptId::new(id),
            root: dir.to_path_buf(),
            entry,
        })
    }
}

/// Create the scripts root if it does not exist yet.
pub fn ensure_dir(dir: &Path) -> RuntimeResult<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            RuntimeError::ScriptsDirectory(format!("failed to create {}: {}", dir.display(), e))
        })?;
        info!("Created directory {:?}", dir);
    }
    Ok(())
}

/// Discover all bundles under `dir`.
pub fn discover_bundles(dir: &Path, order: LoadOrder) -> RuntimeResult<Vec<ScriptBundle>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        RuntimeError::ScriptsDirectory(format!("failed to read {}: {}", dir.display(), e))
    })?;

    let mut bundles = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        match ScriptBundle::from_dir(&path) {
            Some(bundle) => {
                debug!("Discovered script bundle {} at {:?}", bundle.id, path);
                bundles.push(bundle);
            }
            None => debug!("Skipping {:?}: no {}", path, ENTRY_FILE),
        }
    }

    if order == LoadOrder::Lexicographic {
        bundles.sort_by(|a, b| a.id.cmp(&b.id));
    }

    debug!("Discovered {} script bundles in {:?}", bundles.len(), dir);
    Ok(bundles)
}
