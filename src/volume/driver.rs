use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{CryptainerError, Result},
    fs_secure::{is_empty_dir, remove_empty_dir},
    types::{Passphrase, VolumeName},
};

/// Supported container backends, in detection priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// Directory container managed by `gocryptfs`.
    GoCryptFs,
    /// Single-file container managed by `veracrypt`.
    VeraCrypt,
}

impl VolumeType {
    /// Every registered type, highest detection priority first.
    pub const ALL: [VolumeType; 2] = [VolumeType::GoCryptFs, VolumeType::VeraCrypt];

    /// Identifier used on the command line.
    pub fn id(self) -> &'static str {
        match self {
            Self::GoCryptFs => "gocryptfs",
            Self::VeraCrypt => "veracrypt",
        }
    }

    /// Human readable name.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::GoCryptFs => "GoCryptFS",
            Self::VeraCrypt => "VeraCrypt",
        }
    }

    /// Exact, case-sensitive identifier lookup.
    pub fn from_id(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == value)
    }
}

impl std::fmt::Display for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Backend-independent creation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Requested container size such as `500M`.
    pub size: Option<String>,
}

/// Capability set every container backend implements.
pub trait VolumeDriver: Send + Sync {
    /// Backend handled by this driver.
    fn volume_type(&self) -> VolumeType;

    /// Container location for `name` inside `volumes_dir`.
    fn container_path(&self, volumes_dir: &Path, name: &VolumeName) -> PathBuf;

    /// Side-effect-free heuristic check that `path` is one of our containers.
    fn detect(&self, path: &Path) -> bool;

    /// Volume identity for a detected container.
    fn identity(&self, path: &Path) -> Option<String> {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_owned)
    }

    /// Materializes a new container and returns its path.
    fn create(
        &self,
        name: &VolumeName,
        volumes_dir: &Path,
        options: &CreateOptions,
        passphrase: &Passphrase,
    ) -> Result<PathBuf>;

    /// Attaches `container` at `mount_point`.
    fn mount(&self, container: &Path, mount_point: &Path, passphrase: &Passphrase) -> Result<()>;

    /// Detaches whatever is mounted at `mount_point`.
    fn unmount(&self, mount_point: &Path) -> Result<()>;
}

/// Creates the mount point when absent. Returns whether it was created here.
pub fn prepare_mount_point(mount_point: &Path) -> Result<bool> {
    if mount_point.exists() {
        if !mount_point.is_dir() || !is_empty_dir(mount_point)? {
            return Err(CryptainerError::MountPointUnavailable(
                mount_point.to_path_buf(),
            ));
        }
        return Ok(false);
    }
    fs::create_dir_all(mount_point)?;
    debug!(mount_point = %mount_point.display(), "created mount point");
    Ok(true)
}

/// Removes a mount point created by [`prepare_mount_point`] after a failed mount.
pub fn release_mount_point(mount_point: &Path, created: bool) {
    if created {
        if let Err(error) = remove_empty_dir(mount_point) {
            debug!(mount_point = %mount_point.display(), %error, "could not remove mount point");
        }
    }
}

pub(crate) fn target_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
