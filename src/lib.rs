#![deny(missing_docs)]
//! Cryptainer creates, mounts and retires encrypted volumes backed by
//! gocryptfs and VeraCrypt.

/// Audit log module.
pub mod audit;
/// Volume catalog rebuilt from the volumes directory.
pub mod catalog;
/// Command-line interface.
pub mod cli;
/// Config file parsing and validation.
pub mod config;
/// Passphrase generation and credential storage.
pub mod credentials;
/// Error types.
pub mod error;
/// Secure filesystem helpers.
pub mod fs_secure;
/// Volume lifecycle orchestration.
pub mod manager;
/// Per-user state layout.
pub mod paths;
/// Template tree copying.
pub mod template;
/// Shared types.
pub mod types;
/// Backend drivers, type registry and mount table.
pub mod volume;
