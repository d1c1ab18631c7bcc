use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    fs_secure::{create_private_file_if_missing, set_permissions, PRIVATE_FILE_MODE},
    volume::VolumeType,
};

/// Audit events emitted by the system.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Container was created.
    VolumeCreated {
        /// Volume identity.
        volume: String,
        /// Backend type.
        volume_type: VolumeType,
        /// Container location.
        container: PathBuf,
    },
    /// Volume was attached.
    VolumeMounted {
        /// Volume identity.
        volume: String,
        /// Mount location.
        mountpoint: PathBuf,
    },
    /// Volume was detached.
    VolumeUnmounted {
        /// Volume identity.
        volume: String,
        /// Unmount reason (`explicit`, `clean`).
        reason: String,
    },
    /// Container was deleted by prune.
    VolumePruned {
        /// Volume identity.
        volume: String,
        /// Age in days when deleted.
        age_days: i64,
    },
    /// Empty mount directory was removed.
    MountDirCleaned {
        /// Removed directory.
        path: PathBuf,
    },
    /// Passphrase was written to the credential store.
    PassphraseStored {
        /// Volume identity.
        volume: String,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AuditLine {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: AuditEvent,
}

/// JSONL append-only audit log writer.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        create_private_file_if_missing(&file_path, b"")?;
        set_permissions(&file_path, PRIVATE_FILE_MODE)?;
        Ok(Self { path: file_path })
    }

    /// Appends one event as a JSON line.
    pub fn log(&self, event: AuditEvent) -> Result<()> {
        let line = AuditLine {
            timestamp: Utc::now(),
            event,
        };

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        serde_json::to_writer(&mut file, &line)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Returns the audit file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
