//! Passphrase generation and persistence keyed by volume identity.

/// Random passphrase generation.
pub mod generator;
/// KeePass-backed secret store.
pub mod keepass;
/// Secret store trait and one-record-per-volume policy.
pub mod store;

pub use generator::{generate, PassphraseGenerator};
pub use keepass::{KeepassExecutor, KeepassOutput, KeepassStore, MasterPassword, SystemKeepassExecutor};
pub use store::{CredentialManager, SecretStore};

use crate::{error::Result, types::Passphrase};

/// Interactive passphrase source.
pub trait PassphrasePrompt: Send + Sync {
    /// Asks for one passphrase described by `label`.
    fn prompt(&self, label: &str) -> Result<Passphrase>;
}
