//! Directory scan that rebuilds the volume catalog on every run.

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::{CryptainerError, Result},
    volume::{MountTable, TypeRegistry, VolumeType},
};

/// One recognized container.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Volume {
    /// Identity: container base name without extension.
    pub name: String,
    /// Detected backend.
    pub volume_type: VolumeType,
    /// Container file or directory.
    pub container_path: PathBuf,
    /// Where the volume is, or would be, mounted.
    pub mount_path: PathBuf,
    /// Live mount status at scan time.
    pub mounted: bool,
    /// Filesystem birth time, when available.
    pub created_at: Option<DateTime<Utc>>,
    /// Filesystem access time.
    pub last_accessed: Option<DateTime<Utc>>,
    /// Filesystem modification time.
    pub modified_at: Option<DateTime<Utc>>,
}

impl Volume {
    /// Latest of access and modification time, else the birth time.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        [self.last_accessed, self.modified_at]
            .into_iter()
            .flatten()
            .max()
            .or(self.created_at)
    }

    /// Whole days since [`Volume::last_activity`].
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_activity()
            .map(|timestamp| (now - timestamp).num_days())
    }
}

/// One child of the volumes directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogEntry {
    /// Recognized container.
    Volume(Volume),
    /// Present on disk but matched by no driver.
    Unrecognized {
        /// File name.
        name: String,
        /// Full path.
        path: PathBuf,
    },
}

impl CatalogEntry {
    /// Display name of the entry.
    pub fn name(&self) -> &str {
        match self {
            Self::Volume(volume) => &volume.name,
            Self::Unrecognized { name, .. } => name,
        }
    }
}

/// Snapshot of the volumes directory.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Lists immediate, non-hidden children of `volumes_dir` in name order.
    pub fn scan<M>(
        volumes_dir: &Path,
        mount_dir: &Path,
        registry: &TypeRegistry,
        mount_table: &M,
    ) -> Result<Self>
    where
        M: MountTable + ?Sized,
    {
        let mut paths = Vec::new();
        for entry in fs::read_dir(volumes_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            paths.push((file_name, entry.path()));
        }
        paths.sort_by(|left, right| left.0.cmp(&right.0));

        let mut entries = Vec::with_capacity(paths.len());
        for (file_name, path) in paths {
            let Some(driver) = registry.resolve_by_path(&path) else {
                debug!(path = %path.display(), "unrecognized entry in volumes directory");
                entries.push(CatalogEntry::Unrecognized {
                    name: file_name,
                    path,
                });
                continue;
            };
            let Some(name) = driver.identity(&path) else {
                warn!(path = %path.display(), "container has no usable identity");
                entries.push(CatalogEntry::Unrecognized {
                    name: file_name,
                    path,
                });
                continue;
            };

            let metadata = fs::metadata(&path)?;
            let mount_path = mount_dir.join(&name);
            let mounted = mount_table.is_mounted(&mount_path)?;
            entries.push(CatalogEntry::Volume(Volume {
                name,
                volume_type: driver.volume_type(),
                container_path: path,
                mount_path,
                mounted,
                created_at: timestamp(metadata.created()),
                last_accessed: timestamp(metadata.accessed()),
                modified_at: timestamp(metadata.modified()),
            }));
        }

        Ok(Self { entries })
    }

    /// Builds a catalog from pre-computed entries.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// All entries in scan order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Recognized volumes in scan order.
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.entries.iter().filter_map(|entry| match entry {
            CatalogEntry::Volume(volume) => Some(volume),
            CatalogEntry::Unrecognized { .. } => None,
        })
    }

    /// Resolves one identity to a single volume.
    pub fn lookup(&self, name: &str) -> Result<&Volume> {
        let matches = self
            .volumes()
            .filter(|volume| volume.name == name)
            .collect::<Vec<_>>();
        match matches.as_slice() {
            [] => Err(CryptainerError::NotFound(name.to_owned())),
            [volume] => Ok(volume),
            many => Err(CryptainerError::AmbiguousType {
                name: name.to_owned(),
                candidates: many
                    .iter()
                    .map(|volume| volume.volume_type.id().to_owned())
                    .collect(),
            }),
        }
    }

    /// Returns true when any recognized volume uses `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.volumes().any(|volume| volume.name == name)
    }
}

fn timestamp(value: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    value.ok().map(DateTime::<Utc>::from)
}
