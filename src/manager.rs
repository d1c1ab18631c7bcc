//! Lifecycle orchestration over the volume catalog.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    audit::{AuditEvent, AuditLog},
    catalog::{Catalog, Volume},
    config::CryptainerConfig,
    credentials::{CredentialManager, PassphraseGenerator, PassphrasePrompt, SecretStore},
    error::{CryptainerError, Result},
    fs_secure::{remove_artifact, remove_empty_dir},
    template::copy_template,
    types::{Passphrase, VolumeName},
    volume::{CreateOptions, MountTable, TypeRegistry, VolumeType},
};

const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(3);
const MOUNT_READY_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Parameters for [`VolumeManager::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// New volume identity.
    pub name: String,
    /// Type identifier such as `gocryptfs`.
    pub type_name: String,
    /// Container size, required by some backends.
    pub size: Option<String>,
    /// Mount right after creation.
    pub auto_mount: bool,
    /// Generate the passphrase and keep it in the credential store.
    pub use_credential_store: bool,
    /// Copy the configured template into the new mount.
    pub use_template: bool,
    /// Generate a passphrase without storing it.
    pub generate: bool,
    /// Caller-supplied passphrase; prompted for when absent.
    pub passphrase: Option<Passphrase>,
}

/// Result of a successful creation.
#[derive(Debug)]
pub struct CreatedVolume {
    /// Freshly scanned volume.
    pub volume: Volume,
    /// Generated passphrase that was not stored anywhere. Show it once.
    pub generated_passphrase: Option<Passphrase>,
    /// Whether the passphrase went to the credential store.
    pub stored: bool,
    /// Files copied from the template.
    pub template_files: Option<usize>,
    /// Auto-mount or template failure. The container itself was created.
    pub follow_up_error: Option<CryptainerError>,
}

/// Per-name result inside a batch.
#[derive(Debug)]
pub struct VolumeOutcome {
    /// Name as given by the caller.
    pub name: String,
    /// Outcome for that name.
    pub result: Result<()>,
}

/// Aggregate of a multi-name operation.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Outcomes in request order.
    pub outcomes: Vec<VolumeOutcome>,
}

impl BatchReport {
    /// True when every name succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    /// Failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &VolumeOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }
}

/// Volume flagged by pruning.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PruneCandidate {
    /// Volume identity.
    pub name: String,
    /// Backend.
    pub volume_type: VolumeType,
    /// Container location.
    pub container_path: PathBuf,
    /// Days since last activity.
    pub age_days: i64,
}

/// Outcome of a prune pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Threshold used, zero when pruning is disabled.
    pub max_age_days: u64,
    /// Old, unmounted volumes.
    pub candidates: Vec<PruneCandidate>,
    /// Old volumes left alone because they are mounted.
    pub skipped_mounted: Vec<String>,
    /// Candidates actually deleted.
    pub deleted: Vec<String>,
    /// Deletions that failed.
    pub failures: Vec<VolumeOutcome>,
}

/// Outcome of a clean pass.
#[derive(Debug, Default)]
pub struct CleanReport {
    /// Volumes unmounted by this pass.
    pub unmounted: Vec<String>,
    /// Mounted volumes left in place because they are in use.
    pub busy: Vec<String>,
    /// Empty mount directories removed.
    pub removed_dirs: Vec<PathBuf>,
    /// Unexpected per-volume failures.
    pub failures: Vec<VolumeOutcome>,
}

impl CleanReport {
    /// True when nothing was eligible.
    pub fn is_noop(&self) -> bool {
        self.unmounted.is_empty() && self.removed_dirs.is_empty() && self.failures.is_empty()
    }
}

/// Coordinator for volume lifecycle operations.
pub struct VolumeManager<M, S>
where
    M: MountTable,
    S: SecretStore,
{
    config: CryptainerConfig,
    registry: TypeRegistry,
    mount_table: M,
    credentials: Option<CredentialManager<S>>,
    prompt: Box<dyn PassphrasePrompt>,
    audit_log: AuditLog,
}

impl<M, S> VolumeManager<M, S>
where
    M: MountTable,
    S: SecretStore,
{
    /// Constructs a volume manager.
    pub fn new(
        config: CryptainerConfig,
        registry: TypeRegistry,
        mount_table: M,
        credentials: Option<CredentialManager<S>>,
        prompt: Box<dyn PassphrasePrompt>,
        audit_log: AuditLog,
    ) -> Self {
        Self {
            config,
            registry,
            mount_table,
            credentials,
            prompt,
            audit_log,
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &CryptainerConfig {
        &self.config
    }

    /// Rescans the volumes directory.
    pub fn catalog(&self) -> Result<Catalog> {
        Catalog::scan(
            &self.config.volumes_dir,
            &self.config.mount_dir,
            &self.registry,
            &self.mount_table,
        )
    }

    /// Creates a container, optionally storing its passphrase and mounting it.
    pub fn create(&self, request: CreateRequest) -> Result<CreatedVolume> {
        let name = VolumeName::new(&request.name)?;
        let driver = self.registry.resolve_by_name(&request.type_name)?;
        if request.use_template {
            if !request.auto_mount {
                return Err(CryptainerError::UnsupportedOption {
                    target: name.to_string(),
                    detail: "--template requires --auto-mount".to_owned(),
                });
            }
            if self.config.template_path.is_none() {
                return Err(CryptainerError::InvalidInput(
                    "template.template_path is not configured".to_owned(),
                ));
            }
        }

        if self.catalog()?.contains(name.as_str()) {
            return Err(CryptainerError::AlreadyExists(name.to_string()));
        }
        let container = driver.container_path(&self.config.volumes_dir, &name);
        if container.exists() {
            return Err(CryptainerError::AlreadyExists(name.to_string()));
        }

        let credentials = if request.use_credential_store {
            let credentials = self.credentials.as_ref().ok_or_else(|| {
                CryptainerError::StoreUnavailable("no [keepass] database configured".to_owned())
            })?;
            credentials.ensure_absent(name.as_str())?;
            Some(credentials)
        } else {
            None
        };

        let generated = request.use_credential_store || request.generate;
        let passphrase = if generated {
            PassphraseGenerator::new(self.config.passgen_length)?.generate()
        } else {
            match request.passphrase {
                Some(passphrase) => passphrase,
                None => self.prompt.prompt(&format!("Passphrase for new volume {name}"))?,
            }
        };
        if passphrase.is_empty() {
            return Err(CryptainerError::InvalidInput(
                "passphrase cannot be empty".to_owned(),
            ));
        }

        let options = CreateOptions { size: request.size };
        let container = driver.create(&name, &self.config.volumes_dir, &options, &passphrase)?;
        if !driver.detect(&container) {
            remove_artifact(&container)?;
            return Err(CryptainerError::tool_failure(
                driver.volume_type().id(),
                format!("{name}: created container was not recognized"),
            ));
        }
        self.record(AuditEvent::VolumeCreated {
            volume: name.to_string(),
            volume_type: driver.volume_type(),
            container: container.clone(),
        });

        if let Some(credentials) = credentials {
            if let Err(error) = credentials.store(name.as_str(), &passphrase, false) {
                warn!(volume = %name, %error, "storing passphrase failed; removing container");
                remove_artifact(&container)?;
                return Err(error);
            }
            self.record(AuditEvent::PassphraseStored {
                volume: name.to_string(),
            });
        }

        let mut template_files = None;
        let mut follow_up_error = None;
        if request.auto_mount {
            let mount_path = self.config.mount_path_for(name.as_str());
            let mounted = self.attach(
                name.as_str(),
                driver.volume_type(),
                &container,
                &mount_path,
                &passphrase,
            );
            let copied = mounted.and_then(|()| match self.config.template_path.as_ref() {
                Some(template) if request.use_template => {
                    copy_template(template, &mount_path).map(Some)
                }
                _ => Ok(None),
            });
            match copied {
                Ok(count) => template_files = count,
                Err(error) => follow_up_error = Some(error),
            }
        }

        // The container exists from here on; a failed rescan must not swallow the passphrase.
        let volume = match self
            .catalog()
            .and_then(|catalog| catalog.lookup(name.as_str()).cloned())
        {
            Ok(volume) => volume,
            Err(error) => {
                warn!(volume = %name, %error, "rescan after create failed");
                Volume {
                    name: name.to_string(),
                    volume_type: driver.volume_type(),
                    mount_path: self.config.mount_path_for(name.as_str()),
                    mounted: request.auto_mount && follow_up_error.is_none(),
                    container_path: container.clone(),
                    created_at: None,
                    last_accessed: None,
                    modified_at: None,
                }
            }
        };
        info!(volume = %name, volume_type = %driver.volume_type(), "created volume");
        let stored = request.use_credential_store;
        Ok(CreatedVolume {
            volume,
            generated_passphrase: (generated && !stored).then_some(passphrase),
            stored,
            template_files,
            follow_up_error,
        })
    }

    /// Mounts each name independently.
    pub fn mount(&self, names: &[String]) -> Result<BatchReport> {
        let catalog = self.catalog()?;
        let outcomes = names
            .iter()
            .map(|name| VolumeOutcome {
                name: name.clone(),
                result: self.mount_one(&catalog, name),
            })
            .collect();
        Ok(BatchReport { outcomes })
    }

    /// Unmounts each name independently.
    pub fn unmount(&self, names: &[String]) -> Result<BatchReport> {
        let catalog = self.catalog()?;
        let outcomes = names
            .iter()
            .map(|name| VolumeOutcome {
                name: name.clone(),
                result: self.unmount_one(&catalog, name),
            })
            .collect();
        Ok(BatchReport { outcomes })
    }

    /// Flags unmounted volumes older than the threshold; deletes them with `delete`.
    pub fn prune(&self, max_age_override: Option<u64>, delete: bool) -> Result<PruneReport> {
        let max_age_days = max_age_override.unwrap_or(self.config.prune_max_age_days);
        let mut report = PruneReport {
            max_age_days,
            ..PruneReport::default()
        };
        if max_age_days == 0 {
            debug!("pruning disabled");
            return Ok(report);
        }

        let now = Utc::now();
        let threshold = i64::try_from(max_age_days).unwrap_or(i64::MAX);
        for volume in self.catalog()?.volumes() {
            let Some(age_days) = volume.age_days(now) else {
                continue;
            };
            if age_days <= threshold {
                continue;
            }
            if self.mount_table.is_mounted(&volume.mount_path)? {
                report.skipped_mounted.push(volume.name.clone());
                continue;
            }
            report.candidates.push(PruneCandidate {
                name: volume.name.clone(),
                volume_type: volume.volume_type,
                container_path: volume.container_path.clone(),
                age_days,
            });
        }

        if !delete {
            return Ok(report);
        }
        for candidate in &report.candidates {
            match self.delete_container(candidate) {
                Ok(()) => report.deleted.push(candidate.name.clone()),
                Err(error) => report.failures.push(VolumeOutcome {
                    name: candidate.name.clone(),
                    result: Err(error),
                }),
            }
        }
        Ok(report)
    }

    /// Unmounts idle volumes and removes empty, stale mount directories.
    pub fn clean(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        for volume in self.catalog()?.volumes() {
            if !self.mount_table.is_mounted(&volume.mount_path)? {
                continue;
            }
            let driver = self.registry.driver(volume.volume_type)?;
            match driver.unmount(&volume.mount_path) {
                Ok(()) => {
                    self.record(AuditEvent::VolumeUnmounted {
                        volume: volume.name.clone(),
                        reason: "clean".to_owned(),
                    });
                    report.unmounted.push(volume.name.clone());
                }
                Err(CryptainerError::Busy(_)) => {
                    debug!(volume = %volume.name, "volume in use; leaving it mounted");
                    report.busy.push(volume.name.clone());
                }
                Err(error) => report.failures.push(VolumeOutcome {
                    name: volume.name.clone(),
                    result: Err(error),
                }),
            }
        }

        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.config.mount_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                candidates.push(path);
            }
        }
        candidates.sort();
        for path in candidates {
            if self.mount_table.is_mounted(&path)? {
                continue;
            }
            if remove_empty_dir(&path)? {
                self.record(AuditEvent::MountDirCleaned { path: path.clone() });
                report.removed_dirs.push(path);
            }
        }

        info!(
            unmounted = report.unmounted.len(),
            busy = report.busy.len(),
            removed_dirs = report.removed_dirs.len(),
            "clean finished"
        );
        Ok(report)
    }

    fn mount_one(&self, catalog: &Catalog, name: &str) -> Result<()> {
        let volume = catalog.lookup(name)?;
        if self.mount_table.is_mounted(&volume.mount_path)? {
            return Err(CryptainerError::AlreadyMounted(volume.name.clone()));
        }
        let passphrase = self.passphrase_for(&volume.name)?;
        self.attach(
            &volume.name,
            volume.volume_type,
            &volume.container_path,
            &volume.mount_path,
            &passphrase,
        )
    }

    fn unmount_one(&self, catalog: &Catalog, name: &str) -> Result<()> {
        let volume = catalog.lookup(name)?;
        if !self.mount_table.is_mounted(&volume.mount_path)? {
            return Err(CryptainerError::NotMounted(volume.name.clone()));
        }
        let driver = self.registry.driver(volume.volume_type)?;
        driver.unmount(&volume.mount_path)?;
        self.record(AuditEvent::VolumeUnmounted {
            volume: volume.name.clone(),
            reason: "explicit".to_owned(),
        });
        info!(volume = %volume.name, "unmounted volume");

        if self.config.auto_cleanup && remove_empty_dir(&volume.mount_path)? {
            self.record(AuditEvent::MountDirCleaned {
                path: volume.mount_path.clone(),
            });
        }
        Ok(())
    }

    fn attach(
        &self,
        name: &str,
        volume_type: VolumeType,
        container: &Path,
        mount_path: &Path,
        passphrase: &Passphrase,
    ) -> Result<()> {
        let driver = self.registry.driver(volume_type)?;
        driver.mount(container, mount_path, passphrase)?;
        if let Err(error) = self.wait_for_mount_readiness(name, volume_type, mount_path) {
            if let Err(detach_error) = driver.unmount(mount_path) {
                warn!(volume = name, error = %detach_error, "detaching unready mount failed");
            }
            if let Err(cleanup_error) = remove_empty_dir(mount_path) {
                warn!(volume = name, error = %cleanup_error, "removing unready mount point failed");
            }
            return Err(error);
        }
        self.record(AuditEvent::VolumeMounted {
            volume: name.to_owned(),
            mountpoint: mount_path.to_path_buf(),
        });
        info!(volume = name, mountpoint = %mount_path.display(), "mounted volume");
        Ok(())
    }

    fn record(&self, event: AuditEvent) {
        if let Err(error) = self.audit_log.log(event) {
            warn!(path = %self.audit_log.path().display(), %error, "audit write failed");
        }
    }

    fn passphrase_for(&self, name: &str) -> Result<Passphrase> {
        if let Some(credentials) = self.credentials.as_ref() {
            if let Some(passphrase) = credentials.retrieve(name)? {
                return Ok(passphrase);
            }
        }
        self.prompt.prompt(&format!("Passphrase for {name}"))
    }

    fn delete_container(&self, candidate: &PruneCandidate) -> Result<()> {
        remove_artifact(&candidate.container_path)?;
        self.record(AuditEvent::VolumePruned {
            volume: candidate.name.clone(),
            age_days: candidate.age_days,
        });
        if self.credentials.is_some() {
            info!(volume = %candidate.name, "stored passphrase, if any, was left in place");
        }
        info!(volume = %candidate.name, age_days = candidate.age_days, "pruned volume");
        Ok(())
    }

    fn wait_for_mount_readiness(
        &self,
        name: &str,
        volume_type: VolumeType,
        mount_path: &Path,
    ) -> Result<()> {
        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        loop {
            if self.mount_table.is_mounted(mount_path)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CryptainerError::tool_failure(
                    volume_type.id(),
                    format!("{name}: mount did not become ready: {}", mount_path.display()),
                ));
            }
            thread::sleep(MOUNT_READY_POLL_INTERVAL);
        }
    }
}
