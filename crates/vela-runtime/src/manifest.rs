//! Application manifest (`app.toml`).
//!
//! ```toml
//! [app]
//! entry = "main.js"
//! title = "My App"
//! hot_reload = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::runtime::RuntimeOptions;

/// Conventional manifest file name, looked up through the VFS like any
/// other file.
pub const MANIFEST_FILE_NAME: &str = "app.toml";

/// Parsed application manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppManifest {
    /// The `[app]` table.
    pub app: AppInfo,
}

/// The `[app]` table of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppInfo {
    /// Entry script path, VFS-spelled.
    pub entry: String,

    /// Window title; defaults to the entry path when absent.
    #[serde(default)]
    pub title: Option<String>,

    /// Watch the entry script and reload on change.
    #[serde(default)]
    pub hot_reload: bool,

    /// Background worker pool size; 0 sizes from the CPU count.
    #[serde(default)]
    pub worker_threads: usize,
}

impl AppManifest {
    /// Parse a manifest from TOML text.
    pub fn from_str(text: &str) -> Result<Self, RuntimeError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a manifest file from disk.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Runtime options implied by this manifest.
    pub fn options(&self) -> RuntimeOptions {
        RuntimeOptions {
            worker_threads: self.app.worker_threads,
            hot_reload: self.app.hot_reload,
            ..RuntimeOptions::default()
        }
    }
}
