use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    error::{CryptainerError, Result},
    fs_secure::remove_artifact,
    types::{Passphrase, VolumeName},
    volume::{
        driver::{prepare_mount_point, release_mount_point, target_label},
        exec::{ToolInvocation, ToolOutput, CREATE_TIMEOUT, MOUNT_TIMEOUT},
        CreateOptions, VolumeDriver, VolumeType,
    },
};

/// Marker file written by `gocryptfs -init`.
pub const CONFIG_MARKER: &str = "gocryptfs.conf";

const EXIT_MOUNT_POINT_NOT_EMPTY: i32 = 10;
const EXIT_WRONG_PASSWORD: i32 = 12;

/// Directory containers driven by `gocryptfs` and `fusermount`.
#[derive(Debug, Clone)]
pub struct GocryptfsDriver {
    gocryptfs_binary: String,
    fusermount_binary: String,
}

impl GocryptfsDriver {
    /// Constructs a driver using default binary names.
    pub fn new() -> Self {
        Self::with_binaries("gocryptfs", "fusermount")
    }

    /// Constructs a driver with custom binaries.
    pub fn with_binaries(
        gocryptfs_binary: impl Into<String>,
        fusermount_binary: impl Into<String>,
    ) -> Self {
        Self {
            gocryptfs_binary: gocryptfs_binary.into(),
            fusermount_binary: fusermount_binary.into(),
        }
    }
}

impl Default for GocryptfsDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeDriver for GocryptfsDriver {
    fn volume_type(&self) -> VolumeType {
        VolumeType::GoCryptFs
    }

    fn container_path(&self, volumes_dir: &Path, name: &VolumeName) -> PathBuf {
        volumes_dir.join(name.as_str())
    }

    fn detect(&self, path: &Path) -> bool {
        path.is_dir() && path.join(CONFIG_MARKER).is_file()
    }

    // Directory names keep their dots.
    fn identity(&self, path: &Path) -> Option<String> {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
    }

    fn create(
        &self,
        name: &VolumeName,
        volumes_dir: &Path,
        options: &CreateOptions,
        passphrase: &Passphrase,
    ) -> Result<PathBuf> {
        let cipher_dir = self.container_path(volumes_dir, name);
        if cipher_dir.exists() {
            return Err(CryptainerError::AlreadyExists(name.to_string()));
        }
        if let Some(size) = options.size.as_deref() {
            debug!(volume = %name, size, "gocryptfs grows on demand; ignoring size");
        }

        fs::create_dir(&cipher_dir)?;
        let result = ToolInvocation::new(&self.gocryptfs_binary, CREATE_TIMEOUT)
            .args(["-q", "-init", "-passfile", "/dev/stdin"])
            .arg(&cipher_dir)
            .passphrase(passphrase)
            .run()
            .and_then(|output| {
                if output.success() {
                    Ok(())
                } else {
                    Err(CryptainerError::tool_failure(
                        &self.gocryptfs_binary,
                        output.diagnostic(),
                    ))
                }
            });

        if let Err(error) = result {
            remove_artifact(&cipher_dir)?;
            return Err(error);
        }
        info!(volume = %name, path = %cipher_dir.display(), "initialized gocryptfs container");
        Ok(cipher_dir)
    }

    fn mount(&self, container: &Path, mount_point: &Path, passphrase: &Passphrase) -> Result<()> {
        let created = prepare_mount_point(mount_point)?;
        let result = ToolInvocation::new(&self.gocryptfs_binary, MOUNT_TIMEOUT)
            .args(["-q", "-passfile", "/dev/stdin"])
            .arg(container)
            .arg(mount_point)
            .passphrase(passphrase)
            .run()
            .and_then(|output| self.classify_mount(&output, container, mount_point));

        if result.is_err() {
            release_mount_point(mount_point, created);
        }
        result
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let output = ToolInvocation::new(&self.fusermount_binary, MOUNT_TIMEOUT)
            .arg("-u")
            .arg(mount_point)
            .run()?;
        if output.success() {
            return Ok(());
        }

        let stderr = output.stderr.to_ascii_lowercase();
        let label = target_label(mount_point);
        if stderr.contains("busy") {
            return Err(CryptainerError::Busy(label));
        }
        if stderr.contains("not mounted") || stderr.contains("not found") {
            return Err(CryptainerError::NotMounted(label));
        }
        Err(CryptainerError::tool_failure(
            &self.fusermount_binary,
            output.diagnostic(),
        ))
    }
}

impl GocryptfsDriver {
    fn classify_mount(&self, output: &ToolOutput, container: &Path, mount_point: &Path) -> Result<()> {
        match output.exit_code {
            Some(0) => Ok(()),
            Some(EXIT_WRONG_PASSWORD) => Err(CryptainerError::WrongPassphrase(target_label(container))),
            Some(EXIT_MOUNT_POINT_NOT_EMPTY) => Err(CryptainerError::MountPointUnavailable(
                mount_point.to_path_buf(),
            )),
            _ => Err(CryptainerError::tool_failure(
                &self.gocryptfs_binary,
                output.diagnostic(),
            )),
        }
    }
}
