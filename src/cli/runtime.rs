use std::path::{Path, PathBuf};

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::{
    audit::AuditLog,
    config::{
        resolve_config_path, write_default_config, ConfigSource, CryptainerConfig, CONFIG_ENV_VAR,
    },
    credentials::{keepass::MASTER_PASSWORD_ENV_VAR, CredentialManager, KeepassStore, MasterPassword},
    error::Result,
    fs_secure::ensure_private_dir,
    manager::VolumeManager,
    paths::AppPaths,
    types::Passphrase,
    volume::{SystemMountTable, TypeRegistry},
};

use super::passphrase_input::StdinPrompt;

/// Environment variable holding a `tracing` filter directive.
pub(crate) const LOG_ENV_VAR: &str = "CRYPTAINER_LOG";

pub(crate) type CliManager = VolumeManager<SystemMountTable, KeepassStore>;

/// Outcome of config resolution at startup.
pub(crate) enum ConfigLoad {
    /// Config parsed and validated.
    Loaded(CryptainerConfig),
    /// No config existed at the default location; a template was written.
    TemplateWritten(PathBuf),
}

/// Installs the stderr subscriber. Safe to call more than once.
pub(crate) fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter = std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub(crate) fn load_config(explicit: Option<&Path>, paths: &AppPaths) -> Result<ConfigLoad> {
    let env_value = std::env::var(CONFIG_ENV_VAR).ok();
    let selection = resolve_config_path(
        explicit,
        env_value.as_deref(),
        &paths.config_file(),
        std::env::current_dir()?,
    )?;
    if selection.source == ConfigSource::Default && !selection.path.exists() {
        write_default_config(&selection.path)?;
        return Ok(ConfigLoad::TemplateWritten(selection.path));
    }
    debug!(source = ?selection.source, path = %selection.path.display(), "loading config");
    Ok(ConfigLoad::Loaded(CryptainerConfig::load_from_path(
        &selection.path,
    )?))
}

pub(crate) fn manager_for_config(config: CryptainerConfig, paths: &AppPaths) -> Result<CliManager> {
    ensure_private_dir(paths.root())?;
    let audit_log = AuditLog::new(paths.audit_file())?;
    let credentials = config.keepass.database.clone().map(|database| {
        let master = match std::env::var(MASTER_PASSWORD_ENV_VAR) {
            Ok(value) if !value.is_empty() => MasterPassword::Fixed(Passphrase::new(value)),
            _ => MasterPassword::Prompt(Box::new(StdinPrompt::new())),
        };
        CredentialManager::new(KeepassStore::new(
            database,
            config.keepass.keyfile.clone(),
            master,
        ))
    });
    Ok(VolumeManager::new(
        config,
        TypeRegistry::with_default_drivers(),
        SystemMountTable::new(),
        credentials,
        Box::new(StdinPrompt::new()),
        audit_log,
    ))
}
