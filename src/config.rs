use std::{
    fs,
    path::{Component, Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{CryptainerError, Result},
    fs_secure::{ensure_private_dir, write_private_file_atomic},
};

const DEFAULT_PASSGEN_LENGTH: usize = 30;
const DEFAULT_PRUNE_MAX_AGE_DAYS: u64 = 365;
const DEFAULT_AUTO_CLEANUP: bool = true;

/// Shortest passphrase the generator will produce.
pub const MIN_PASSGEN_LENGTH: usize = 8;

/// Environment variable selecting the config file.
pub const CONFIG_ENV_VAR: &str = "CRYPTAINER_CONFIG";

/// Template written when the default config file is missing.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# cryptainer configuration

[volumes]
# Directory holding encrypted containers (required).
volumes_dir = ""
# Directory under which volumes are mounted (required).
mount_dir = ""

[template]
# Directory tree copied into freshly created volumes with --template.
template_path = ""

[keepass]
# KeePass database used by --use-keepass.
database = ""
keyfile = ""

[passgen]
length = 30

[misc]
# Days after which unmounted volumes become prune candidates (0 disables).
prune_max_age = 365
auto_cleanup = true
"#;

/// Source used to select the effective config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigSource {
    /// Selected via `--config` CLI flag.
    Flag,
    /// Selected via `CRYPTAINER_CONFIG` environment variable.
    Env,
    /// Per-user default location.
    Default,
}

/// Resolved config selection before parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSelection {
    /// Source used for selection.
    pub source: ConfigSource,
    /// Selected path.
    pub path: PathBuf,
}

/// Raw TOML shape for one config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CryptainerConfigFile {
    /// Container and mount locations.
    #[serde(default)]
    pub volumes: VolumesConfigFile,
    /// Template tree location.
    #[serde(default)]
    pub template: TemplateConfigFile,
    /// KeePass store location.
    #[serde(default)]
    pub keepass: KeepassConfigFile,
    /// Passphrase generator settings.
    #[serde(default)]
    pub passgen: PassgenConfigFile,
    /// Pruning and cleanup policy.
    #[serde(default)]
    pub misc: MiscConfigFile,
}

/// Raw `[volumes]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VolumesConfigFile {
    /// Directory holding containers.
    pub volumes_dir: Option<String>,
    /// Directory holding mount points.
    pub mount_dir: Option<String>,
}

/// Raw `[template]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfigFile {
    /// Template directory.
    pub template_path: Option<String>,
}

/// Raw `[keepass]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KeepassConfigFile {
    /// Database file.
    pub database: Option<String>,
    /// Optional key file.
    pub keyfile: Option<String>,
}

/// Raw `[passgen]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PassgenConfigFile {
    /// Generated passphrase length.
    pub length: Option<usize>,
}

/// Raw `[misc]` section from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MiscConfigFile {
    /// Prune threshold in days.
    pub prune_max_age: Option<i64>,
    /// Remove empty mount directories after unmount.
    pub auto_cleanup: Option<bool>,
}

/// Effective KeePass settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeepassConfig {
    /// Database file, when configured.
    pub database: Option<PathBuf>,
    /// Key file, when configured.
    pub keyfile: Option<PathBuf>,
}

/// Effective and validated configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CryptainerConfig {
    /// Absolute config file path.
    pub source_path: PathBuf,
    /// Directory holding containers.
    pub volumes_dir: PathBuf,
    /// Directory holding mount points.
    pub mount_dir: PathBuf,
    /// Template directory copied into new volumes.
    pub template_path: Option<PathBuf>,
    /// KeePass settings.
    pub keepass: KeepassConfig,
    /// Generated passphrase length.
    pub passgen_length: usize,
    /// Prune threshold in days; zero disables pruning.
    pub prune_max_age_days: u64,
    /// Remove empty mount directories after unmount.
    pub auto_cleanup: bool,
}

impl CryptainerConfig {
    /// Loads and validates a config file from disk.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let absolute_path = absolutize_path(path.as_ref(), &cwd);
        if !absolute_path.exists() {
            return Err(CryptainerError::InvalidInput(format!(
                "config file does not exist: {}",
                absolute_path.display()
            )));
        }

        let raw = fs::read_to_string(&absolute_path)?;
        validate_config_file_permissions(&absolute_path)?;
        Self::parse_from_str(&raw, &absolute_path)
    }

    /// Parses and validates config from TOML text.
    pub fn parse_from_str(raw: &str, source_path: impl AsRef<Path>) -> Result<Self> {
        let parsed = toml::from_str::<CryptainerConfigFile>(raw).map_err(|error| {
            CryptainerError::InvalidInput(format!("invalid config TOML: {error}"))
        })?;
        build_config(parsed, source_path.as_ref())
    }

    /// Returns the mount point for one volume.
    pub fn mount_path_for(&self, name: &str) -> PathBuf {
        self.mount_dir.join(name)
    }
}

/// Resolves one config path based on precedence rules.
pub fn resolve_config_path(
    explicit_path: Option<&Path>,
    env_path: Option<&str>,
    default_path: &Path,
    cwd: impl AsRef<Path>,
) -> Result<ConfigSelection> {
    let cwd = cwd.as_ref();
    if let Some(path) = explicit_path {
        let candidate = absolutize_path(path, cwd);
        if !is_regular_config_candidate(&candidate) {
            return Err(CryptainerError::InvalidInput(format!(
                "config file must be a regular file: {}",
                candidate.display()
            )));
        }
        return Ok(ConfigSelection {
            source: ConfigSource::Flag,
            path: candidate,
        });
    }

    if let Some(value) = env_path {
        if value.trim().is_empty() {
            return Err(CryptainerError::InvalidInput(format!(
                "{CONFIG_ENV_VAR} cannot be empty"
            )));
        }

        let candidate = absolutize_path(Path::new(value), cwd);
        if !is_regular_config_candidate(&candidate) {
            return Err(CryptainerError::InvalidInput(format!(
                "config file must be a regular file: {}",
                candidate.display()
            )));
        }
        return Ok(ConfigSelection {
            source: ConfigSource::Env,
            path: candidate,
        });
    }

    Ok(ConfigSelection {
        source: ConfigSource::Default,
        path: absolutize_path(default_path, cwd),
    })
}

/// Writes the commented template config with private permissions.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    write_private_file_atomic(path, DEFAULT_CONFIG_TEMPLATE.as_bytes())
}

fn build_config(raw: CryptainerConfigFile, source_path: &Path) -> Result<CryptainerConfig> {
    let source_path = absolutize_path(source_path, &std::env::current_dir()?);
    let source_dir = source_path.parent().unwrap_or(Path::new("."));

    let volumes_dir = required_dir(raw.volumes.volumes_dir.as_deref(), "volumes.volumes_dir", source_dir)?;
    let mount_dir = required_dir(raw.volumes.mount_dir.as_deref(), "volumes.mount_dir", source_dir)?;
    let template_path = optional_path(
        raw.template.template_path.as_deref(),
        "template.template_path",
        source_dir,
    )?;
    if let Some(template) = template_path.as_ref() {
        if !template.is_dir() {
            return Err(CryptainerError::InvalidInput(format!(
                "template.template_path must be a directory: {}",
                template.display()
            )));
        }
    }
    let keepass = KeepassConfig {
        database: optional_path(raw.keepass.database.as_deref(), "keepass.database", source_dir)?,
        keyfile: optional_path(raw.keepass.keyfile.as_deref(), "keepass.keyfile", source_dir)?,
    };

    let passgen_length = raw.passgen.length.unwrap_or(DEFAULT_PASSGEN_LENGTH);
    if passgen_length < MIN_PASSGEN_LENGTH {
        return Err(CryptainerError::InvalidInput(format!(
            "passgen.length must be at least {MIN_PASSGEN_LENGTH}"
        )));
    }

    let prune_max_age = raw
        .misc
        .prune_max_age
        .unwrap_or(DEFAULT_PRUNE_MAX_AGE_DAYS as i64);
    if prune_max_age < 0 {
        return Err(CryptainerError::InvalidInput(
            "misc.prune_max_age must not be negative".to_owned(),
        ));
    }

    Ok(CryptainerConfig {
        source_path,
        volumes_dir,
        mount_dir,
        template_path,
        keepass,
        passgen_length,
        prune_max_age_days: prune_max_age as u64,
        auto_cleanup: raw.misc.auto_cleanup.unwrap_or(DEFAULT_AUTO_CLEANUP),
    })
}

fn required_dir(value: Option<&str>, label: &str, source_dir: &Path) -> Result<PathBuf> {
    let literal = value.map(str::trim).unwrap_or_default();
    if literal.is_empty() {
        return Err(CryptainerError::InvalidInput(format!(
            "{label} cannot be empty"
        )));
    }
    let resolved = resolve_path_value(literal, source_dir)?;
    if !resolved.is_dir() {
        return Err(CryptainerError::InvalidInput(format!(
            "{label} must be an existing directory: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

fn optional_path(value: Option<&str>, label: &str, source_dir: &Path) -> Result<Option<PathBuf>> {
    let literal = value.map(str::trim).unwrap_or_default();
    if literal.is_empty() {
        return Ok(None);
    }
    let resolved = resolve_path_value(literal, source_dir)?;
    if !resolved.exists() {
        return Err(CryptainerError::InvalidInput(format!(
            "{label} does not exist: {}",
            resolved.display()
        )));
    }
    Ok(Some(resolved))
}

fn resolve_path_value(value: &str, source_dir: &Path) -> Result<PathBuf> {
    let expanded = expand_home(value)?;
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        source_dir.join(expanded)
    };

    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return Ok(canonical);
    }
    Ok(normalize_path(&absolute))
}

fn expand_home(value: &str) -> Result<PathBuf> {
    if value == "~" {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| CryptainerError::InvalidInput("HOME is not set".to_owned()))?;
        return Ok(PathBuf::from(home));
    }

    if let Some(rest) = value.strip_prefix("~/") {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| CryptainerError::InvalidInput("HOME is not set".to_owned()))?;
        return Ok(PathBuf::from(home).join(rest));
    }

    if value.starts_with('~') {
        return Err(CryptainerError::InvalidInput(
            "only '~' and '~/' home expansion are supported".to_owned(),
        ));
    }

    Ok(PathBuf::from(value))
}

fn normalize_path(path: &Path) -> PathBuf {
    let is_absolute = path.is_absolute();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() && !is_absolute {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        if is_absolute {
            PathBuf::from(std::path::MAIN_SEPARATOR.to_string())
        } else {
            PathBuf::from(".")
        }
    } else {
        normalized
    }
}

fn absolutize_path(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&cwd.join(path))
    }
}

fn validate_config_file_permissions(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() || !metadata.file_type().is_file() {
        return Err(CryptainerError::InvalidInput(format!(
            "config path must be a regular file: {}",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o022 != 0 {
            return Err(CryptainerError::InvalidInput(format!(
                "config file must not be group/world writable: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

fn is_regular_config_candidate(path: &Path) -> bool {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return false;
    };
    !metadata.file_type().is_symlink() && metadata.file_type().is_file()
}
