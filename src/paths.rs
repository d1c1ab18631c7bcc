use std::path::{Path, PathBuf};

use crate::error::{CryptainerError, Result};

const APP_DIR_NAME: &str = ".cryptainer";

/// Canonical layout of the per-user state directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Layout rooted at `$HOME/.cryptainer`.
    pub fn from_home() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| CryptainerError::InvalidInput("HOME is not set".to_owned()))?;
        Ok(Self::new(PathBuf::from(home).join(APP_DIR_NAME)))
    }

    /// State directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default config file.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Audit log JSONL file.
    pub fn audit_file(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }
}
