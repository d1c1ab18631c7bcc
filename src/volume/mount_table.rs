use std::{
    fs, io,
    path::{Path, PathBuf},
    process::Command,
};

use tracing::debug;

use crate::{
    error::Result,
    volume::exec::{map_command_execution_error, retry_exec_busy},
};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Answers whether a path is an active mount point.
pub trait MountTable: Send + Sync {
    /// Returns mount status for one mount point.
    fn is_mounted(&self, mount_point: &Path) -> Result<bool>;
}

/// Mount table backed by `mountpoint -q` with a `/proc/mounts` fallback.
#[derive(Debug, Clone)]
pub struct SystemMountTable {
    mountpoint_binary: String,
    proc_mounts: PathBuf,
}

impl SystemMountTable {
    /// Uses the system `mountpoint` binary.
    pub fn new() -> Self {
        Self::with_sources("mountpoint", PROC_MOUNTS)
    }

    /// Uses a custom `mountpoint` binary and mounts file.
    pub fn with_sources(mountpoint_binary: impl Into<String>, proc_mounts: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint_binary: mountpoint_binary.into(),
            proc_mounts: proc_mounts.into(),
        }
    }

    fn listed_in_proc_mounts(&self, mount_point: &Path) -> Result<bool> {
        let mounts = match fs::read_to_string(&self.proc_mounts) {
            Ok(mounts) => mounts,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(error.into()),
        };
        let wanted = mount_point.to_string_lossy();
        Ok(mounts.lines().any(|line| {
            line.split_whitespace()
                .nth(1)
                .is_some_and(|field| unescape_mount_path(field) == wanted)
        }))
    }
}

impl Default for SystemMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for SystemMountTable {
    fn is_mounted(&self, mount_point: &Path) -> Result<bool> {
        // A stale FUSE mount fails stat with ENOTCONN but is still in the table.
        match fs::symlink_metadata(mount_point) {
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(error) => {
                debug!(path = %mount_point.display(), %error, "mount point unreadable; reading mounts file");
                return self.listed_in_proc_mounts(mount_point);
            }
        }
        let canonical = match mount_point.canonicalize() {
            Ok(canonical) => canonical,
            Err(error) => {
                debug!(path = %mount_point.display(), %error, "cannot resolve mount point; reading mounts file");
                return self.listed_in_proc_mounts(mount_point);
            }
        };

        let status = retry_exec_busy(|| {
            Command::new(&self.mountpoint_binary)
                .arg("-q")
                .arg(&canonical)
                .status()
        });
        match status {
            Ok(status) => Ok(status.success()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(binary = %self.mountpoint_binary, "mountpoint unavailable; reading mounts file");
                self.listed_in_proc_mounts(&canonical)
            }
            Err(error) => Err(map_command_execution_error(&self.mountpoint_binary, error)),
        }
    }
}

/// Decodes octal escapes used in `/proc/mounts` (`\040` is a space).
pub fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && is_octal_triplet(&bytes[index + 1..index + 4])
        {
            let value = (bytes[index + 1] - b'0') as u32 * 64
                + (bytes[index + 2] - b'0') as u32 * 8
                + (bytes[index + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                decoded.push(byte);
                index += 4;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn is_octal_triplet(bytes: &[u8]) -> bool {
    bytes.iter().all(|byte| (b'0'..=b'7').contains(byte))
}
