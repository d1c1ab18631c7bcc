use std::path::{Path, PathBuf};

use tracing::info;

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

/// Canonical VeraCrypt container extension.
pub const CONTAINER_EXTENSION: &str = "hc";

const BASE_ARGS: [&str; 3] = ["--text", "--non-interactive", "--stdin"];

/// Single-file containers driven by the `veracrypt` text interface.
///
/// Detection only looks at the extension. VeraCrypt containers are built to
/// be indistinguishable from random data, so a renamed container will not be
/// recognized and any `.hc` file will be.
#[derive(Debug, Clone)]
pub struct VeracryptDriver {
    binary: String,
}

impl VeracryptDriver {
    /// Constructs a driver using the default binary name.
    pub fn new() -> Self {
        Self::with_binary("veracrypt")
    }

    /// Constructs a driver with a custom binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn invocation(&self, timeout: std::time::Duration) -> ToolInvocation {
        ToolInvocation::new(&self.binary, timeout).args(BASE_ARGS)
    }

    fn failure(&self, output: &ToolOutput) -> CryptainerError {
        CryptainerError::tool_failure(&self.binary, output.diagnostic())
    }
}

impl Default for VeracryptDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeDriver for VeracryptDriver {
    fn volume_type(&self) -> VolumeType {
        VolumeType::VeraCrypt
    }

    fn container_path(&self, volumes_dir: &Path, name: &VolumeName) -> PathBuf {
        volumes_dir.join(format!("{name}.{CONTAINER_EXTENSION}"))
    }

    fn detect(&self, path: &Path) -> bool {
        path.is_file()
            && path
                .extension()
                .is_some_and(|extension| extension == CONTAINER_EXTENSION)
    }

    fn create(
        &self,
        name: &VolumeName,
        volumes_dir: &Path,
        options: &CreateOptions,
        passphrase: &Passphrase,
    ) -> Result<PathBuf> {
        let size = options
            .size
            .as_deref()
            .ok_or_else(|| CryptainerError::UnsupportedOption {
                target: name.to_string(),
                detail: "veracrypt volumes require a size".to_owned(),
            })?;
        validate_size(size)?;

        let container = self.container_path(volumes_dir, name);
        if container.exists() {
            return Err(CryptainerError::AlreadyExists(name.to_string()));
        }

        let result = self
            .invocation(CREATE_TIMEOUT)
            .arg("--create")
            .arg(&container)
            .args(["--size", size])
            .args(["--volume-type", "normal"])
            .args(["--encryption", "AES"])
            .args(["--hash", "sha-512"])
            .args(["--filesystem", "exfat"])
            .args(["--pim", "0"])
            .args(["--keyfiles", ""])
            .args(["--random-source", "/dev/urandom"])
            .passphrase(passphrase)
            .run()
            .and_then(|output| {
                if output.success() {
                    Ok(())
                } else {
                    Err(self.failure(&output))
                }
            });

        if let Err(error) = result {
            remove_artifact(&container)?;
            return Err(error);
        }
        info!(volume = %name, path = %container.display(), size, "created veracrypt container");
        Ok(container)
    }

    fn mount(&self, container: &Path, mount_point: &Path, passphrase: &Passphrase) -> Result<()> {
        let created = prepare_mount_point(mount_point)?;
        let result = self
            .invocation(MOUNT_TIMEOUT)
            .args(["--pim", "0", "--keyfiles", "", "--protect-hidden", "no"])
            .arg(container)
            .arg(mount_point)
            .passphrase(passphrase)
            .run()
            .and_then(|output| {
                if output.success() {
                    return Ok(());
                }
                let stderr = output.stderr.to_ascii_lowercase();
                if stderr.contains("incorrect password") {
                    return Err(CryptainerError::WrongPassphrase(target_label(container)));
                }
                if stderr.contains("already mounted") {
                    return Err(CryptainerError::AlreadyMounted(target_label(mount_point)));
                }
                Err(self.failure(&output))
            });

        if result.is_err() {
            release_mount_point(mount_point, created);
        }
        result
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let output = ToolInvocation::new(&self.binary, MOUNT_TIMEOUT)
            .args(["--text", "--non-interactive", "--dismount"])
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
        if stderr.contains("no such volume is mounted") {
            return Err(CryptainerError::NotMounted(label));
        }
        Err(self.failure(&output))
    }
}

/// Validates a size literal of the form `<digits>[K|M|G|T]`.
pub fn validate_size(size: &str) -> Result<()> {
    let digits = size
        .strip_suffix(|character: char| matches!(character, 'K' | 'M' | 'G' | 'T'))
        .unwrap_or(size);
    let valid = !digits.is_empty()
        && digits.chars().all(|character| character.is_ascii_digit())
        && !digits.trim_start_matches('0').is_empty();
    if !valid {
        return Err(CryptainerError::InvalidInput(format!(
            "invalid size '{size}': expected <digits>[K|M|G|T], for example 500M"
        )));
    }
    Ok(())
}
