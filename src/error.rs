use std::{io, path::PathBuf};

use thiserror::Error;

/// Validation failures for volume identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Volume name is empty or too long.
    #[error("invalid name: must be 1..=128 characters")]
    InvalidName,
    /// Volume name attempts path traversal or names a hidden entry.
    #[error("invalid path: traversal and hidden names are not allowed")]
    PathTraversal,
    /// Volume name contains unsupported characters.
    #[error("invalid character in name: use only A-Za-z0-9._-")]
    InvalidCharacter,
}

/// Top-level application errors.
#[derive(Debug, Error)]
pub enum CryptainerError {
    /// Name does not resolve to a volume.
    #[error("{0}: volume not found")]
    NotFound(String),
    /// Target volume or container path already exists.
    #[error("{0}: volume already exists")]
    AlreadyExists(String),
    /// Volume is already attached.
    #[error("{0}: volume is already mounted")]
    AlreadyMounted(String),
    /// Volume is not attached.
    #[error("{0}: volume is not mounted")]
    NotMounted(String),
    /// More than one container claims the same identity.
    #[error("{name}: ambiguous volume type (candidates: {})", .candidates.join(", "))]
    AmbiguousType {
        /// Volume identity.
        name: String,
        /// Conflicting type names.
        candidates: Vec<String>,
    },
    /// Requested or detected type is not registered.
    #[error("{0}: unknown volume type")]
    UnknownType(String),
    /// Option cannot be honoured by the selected backend.
    #[error("{target}: unsupported option: {detail}")]
    UnsupportedOption {
        /// Affected volume or path.
        target: String,
        /// Human readable reason.
        detail: String,
    },
    /// Mount point cannot be used.
    #[error("{}: mount point unavailable", .0.display())]
    MountPointUnavailable(PathBuf),
    /// External tool exited unsuccessfully or could not be run.
    #[error("{tool} failed: {detail}")]
    ExternalToolFailure {
        /// Binary that failed.
        tool: String,
        /// Tool stderr or runner diagnostic.
        detail: String,
    },
    /// External tool rejected the passphrase.
    #[error("{0}: wrong passphrase")]
    WrongPassphrase(String),
    /// Unmount blocked by active use.
    #[error("{0}: resource busy")]
    Busy(String),
    /// Credential store cannot be reached or unlocked.
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),
    /// Credential store already holds a record for this volume.
    #[error("{0}: credential already stored")]
    DuplicateEntry(String),
    /// Input was syntactically valid but semantically unsupported.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON serialization error.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// UTF-8 conversion error.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl CryptainerError {
    pub(crate) fn tool_failure(tool: &str, detail: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.to_owned(),
            detail: detail.into(),
        }
    }
}

/// A typed result used across the crate.
pub type Result<T> = std::result::Result<T, CryptainerError>;

/// Generic invalid-input error.
pub const ERROR_CODE_INVALID_INPUT: &str = "E100";
/// Volume name validation error.
pub const ERROR_CODE_VOLUME_NAME: &str = "E101";
/// Missing runtime dependency or binary.
pub const ERROR_CODE_MISSING_RUNTIME: &str = "E103";
/// Option not supported by the volume backend.
pub const ERROR_CODE_UNSUPPORTED_OPTION: &str = "E104";
/// Resource lookup failed.
pub const ERROR_CODE_NOT_FOUND: &str = "E300";
/// Resource already exists.
pub const ERROR_CODE_ALREADY_EXISTS: &str = "E301";
/// Volume already mounted.
pub const ERROR_CODE_ALREADY_MOUNTED: &str = "E302";
/// Volume not mounted.
pub const ERROR_CODE_NOT_MOUNTED: &str = "E303";
/// Volume type ambiguous or unknown.
pub const ERROR_CODE_TYPE: &str = "E304";
/// External tool failed.
pub const ERROR_CODE_TOOL: &str = "E400";
/// External tool rejected the passphrase.
pub const ERROR_CODE_WRONG_PASSPHRASE: &str = "E401";
/// Unmount blocked or mount point unusable.
pub const ERROR_CODE_BUSY: &str = "E402";
/// Credential store could not be used.
pub const ERROR_CODE_STORE_UNAVAILABLE: &str = "E500";
/// Credential store already has a record.
pub const ERROR_CODE_DUPLICATE_ENTRY: &str = "E501";
/// Filesystem or stream I/O failed.
pub const ERROR_CODE_IO: &str = "E900";
/// Internal serialization/encoding failure.
pub const ERROR_CODE_INTERNAL: &str = "E999";

const ERROR_EXPLANATION_E100: &str = r#"E100 invalid input

The command arguments or configuration values are unsupported.

Common fixes:
  - Run `cryptainer help <command>` for exact argument usage.
  - Check `~/.cryptainer/config.toml` for empty or missing paths."#;
const ERROR_EXPLANATION_E101: &str = r#"E101 invalid volume name

Volume names must be 1..=128 chars, must not start with `.`, and use only:
  A-Z a-z 0-9 . _ -

Examples:
  - Valid: `projects`, `tax-2024`
  - Invalid: `../x`, `a/b`, `.hidden`"#;
const ERROR_EXPLANATION_E103: &str = r#"E103 missing runtime dependency

The command requires a binary that was not found in PATH.

Recovery:
  - Install the missing binary (`gocryptfs`, `fusermount`, `veracrypt`,
    `mountpoint`, `keepassxc-cli`).
  - Verify PATH in the current shell and retry."#;
const ERROR_EXPLANATION_E104: &str = r#"E104 unsupported option

The selected volume type cannot honour one of the options.

Recovery:
  - VeraCrypt volumes need `--size` (example: `-s 500M`).
  - `--template` needs `--auto-mount`."#;
const ERROR_EXPLANATION_E300: &str = r#"E300 volume not found

The name does not match any container in the volumes directory.

Recovery:
  cryptainer list"#;
const ERROR_EXPLANATION_E301: &str = r#"E301 volume already exists

A container with this name is already present.

Recovery:
  - Choose a different name.
  - Run `cryptainer list` to see existing volumes."#;
const ERROR_EXPLANATION_E302: &str = r#"E302 volume already mounted

The volume is attached already; the external tool was not invoked.

Recovery:
  cryptainer umount <name>"#;
const ERROR_EXPLANATION_E303: &str = r#"E303 volume not mounted

The volume is not attached; nothing to unmount.

Recovery:
  cryptainer list"#;
const ERROR_EXPLANATION_E304: &str = r#"E304 volume type unknown or ambiguous

Detection is heuristic. A gocryptfs volume is a directory holding
`gocryptfs.conf`; a VeraCrypt volume is a regular `.hc` file. Two containers
sharing one name (for example `alpha/` and `alpha.hc`) are ambiguous.

Recovery:
  - Rename one of the conflicting containers.
  - Use `-t gocryptfs` or `-t veracrypt` with `create`."#;
const ERROR_EXPLANATION_E400: &str = r#"E400 external tool failure

The encryption tool exited with an error or timed out.

Recovery:
  - Re-run with `--debug` to see the tool invocation.
  - Check the tool's own diagnostics printed after the error."#;
const ERROR_EXPLANATION_E401: &str = r#"E401 wrong passphrase

The encryption tool rejected the passphrase.

Recovery:
  - Retry and check the passphrase.
  - If it was stored, inspect the `cryptainer/<name>` entry in KeePass."#;
const ERROR_EXPLANATION_E402: &str = r#"E402 busy or unavailable mount point

The mount point is in use or not empty.

Recovery:
  - Close files and shells inside the mount and retry.
  - Run `cryptainer clean` to remove stale mount directories."#;
const ERROR_EXPLANATION_E500: &str = r#"E500 credential store unavailable

The KeePass database could not be opened or is not configured.

Recovery:
  - Set `[keepass] database` (and `keyfile`) in the config.
  - Export CRYPTAINER_KEEPASS_PASSWORD or enter the master password."#;
const ERROR_EXPLANATION_E501: &str = r#"E501 credential already stored

A passphrase for this volume name already exists in the store.

Recovery:
  - Choose a different volume name.
  - Or remove the stale `cryptainer/<name>` entry from KeePass."#;
const ERROR_EXPLANATION_E900: &str = r#"E900 I/O failure

Filesystem or stream operations failed.

Recovery:
  - Verify the volumes and mount directories exist and are writable."#;
const ERROR_EXPLANATION_E999: &str = r#"E999 internal runtime failure

An internal serialization or encoding error occurred.

Recovery:
  - Retry once with the same inputs."#;

const KNOWN_ERROR_CODES: [&str; 16] = [
    ERROR_CODE_INVALID_INPUT,
    ERROR_CODE_VOLUME_NAME,
    ERROR_CODE_MISSING_RUNTIME,
    ERROR_CODE_UNSUPPORTED_OPTION,
    ERROR_CODE_NOT_FOUND,
    ERROR_CODE_ALREADY_EXISTS,
    ERROR_CODE_ALREADY_MOUNTED,
    ERROR_CODE_NOT_MOUNTED,
    ERROR_CODE_TYPE,
    ERROR_CODE_TOOL,
    ERROR_CODE_WRONG_PASSPHRASE,
    ERROR_CODE_BUSY,
    ERROR_CODE_STORE_UNAVAILABLE,
    ERROR_CODE_DUPLICATE_ENTRY,
    ERROR_CODE_IO,
    ERROR_CODE_INTERNAL,
];

/// Returns the stable error code for a runtime error.
pub fn classify_error_code(error: &CryptainerError) -> &'static str {
    match error {
        CryptainerError::Validation(_) => ERROR_CODE_VOLUME_NAME,
        CryptainerError::InvalidInput(_) => ERROR_CODE_INVALID_INPUT,
        CryptainerError::UnsupportedOption { .. } => ERROR_CODE_UNSUPPORTED_OPTION,
        CryptainerError::NotFound(_) => ERROR_CODE_NOT_FOUND,
        CryptainerError::AlreadyExists(_) => ERROR_CODE_ALREADY_EXISTS,
        CryptainerError::AlreadyMounted(_) => ERROR_CODE_ALREADY_MOUNTED,
        CryptainerError::NotMounted(_) => ERROR_CODE_NOT_MOUNTED,
        CryptainerError::AmbiguousType { .. } | CryptainerError::UnknownType(_) => {
            ERROR_CODE_TYPE
        }
        CryptainerError::ExternalToolFailure { detail, .. } => classify_tool_failure(detail),
        CryptainerError::WrongPassphrase(_) => ERROR_CODE_WRONG_PASSPHRASE,
        CryptainerError::Busy(_) | CryptainerError::MountPointUnavailable(_) => ERROR_CODE_BUSY,
        CryptainerError::StoreUnavailable(_) => ERROR_CODE_STORE_UNAVAILABLE,
        CryptainerError::DuplicateEntry(_) => ERROR_CODE_DUPLICATE_ENTRY,
        CryptainerError::Io(_) => ERROR_CODE_IO,
        CryptainerError::Serde(_) | CryptainerError::Utf8(_) => ERROR_CODE_INTERNAL,
    }
}

fn classify_tool_failure(detail: &str) -> &'static str {
    if detail
        .to_ascii_lowercase()
        .contains("required binary not found")
    {
        return ERROR_CODE_MISSING_RUNTIME;
    }
    ERROR_CODE_TOOL
}

/// Normalizes a user-provided error code for lookups.
pub fn normalize_error_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Returns an explanation block for a known error code.
pub fn explain_error_code(raw: &str) -> Option<&'static str> {
    let normalized = normalize_error_code(raw);
    match normalized.as_str() {
        ERROR_CODE_INVALID_INPUT => Some(ERROR_EXPLANATION_E100),
        ERROR_CODE_VOLUME_NAME => Some(ERROR_EXPLANATION_E101),
        ERROR_CODE_MISSING_RUNTIME => Some(ERROR_EXPLANATION_E103),
        ERROR_CODE_UNSUPPORTED_OPTION => Some(ERROR_EXPLANATION_E104),
        ERROR_CODE_NOT_FOUND => Some(ERROR_EXPLANATION_E300),
        ERROR_CODE_ALREADY_EXISTS => Some(ERROR_EXPLANATION_E301),
        ERROR_CODE_ALREADY_MOUNTED => Some(ERROR_EXPLANATION_E302),
        ERROR_CODE_NOT_MOUNTED => Some(ERROR_EXPLANATION_E303),
        ERROR_CODE_TYPE => Some(ERROR_EXPLANATION_E304),
        ERROR_CODE_TOOL => Some(ERROR_EXPLANATION_E400),
        ERROR_CODE_WRONG_PASSPHRASE => Some(ERROR_EXPLANATION_E401),
        ERROR_CODE_BUSY => Some(ERROR_EXPLANATION_E402),
        ERROR_CODE_STORE_UNAVAILABLE => Some(ERROR_EXPLANATION_E500),
        ERROR_CODE_DUPLICATE_ENTRY => Some(ERROR_EXPLANATION_E501),
        ERROR_CODE_IO => Some(ERROR_EXPLANATION_E900),
        ERROR_CODE_INTERNAL => Some(ERROR_EXPLANATION_E999),
        _ => None,
    }
}

/// Stable list of explainable error codes.
pub fn known_error_codes() -> &'static [&'static str] {
    &KNOWN_ERROR_CODES
}
