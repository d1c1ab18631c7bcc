use tracing::{debug, info};

use crate::{
    error::{CryptainerError, Result},
    types::Passphrase,
};

/// Key-value secret store keyed by volume name.
pub trait SecretStore: Send + Sync {
    /// Writes a new record.
    fn put(&self, name: &str, passphrase: &Passphrase) -> Result<()>;
    /// Reads a record, `None` when absent.
    fn get(&self, name: &str) -> Result<Option<Passphrase>>;
    /// Returns true when a record exists.
    fn exists(&self, name: &str) -> Result<bool>;
    /// Replaces an existing record.
    fn update(&self, name: &str, passphrase: &Passphrase) -> Result<()>;
}

impl<T: SecretStore + ?Sized> SecretStore for Box<T> {
    fn put(&self, name: &str, passphrase: &Passphrase) -> Result<()> {
        (**self).put(name, passphrase)
    }

    fn get(&self, name: &str) -> Result<Option<Passphrase>> {
        (**self).get(name)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        (**self).exists(name)
    }

    fn update(&self, name: &str, passphrase: &Passphrase) -> Result<()> {
        (**self).update(name, passphrase)
    }
}

/// Enforces one stored passphrase per volume identity.
pub struct CredentialManager<S>
where
    S: SecretStore,
{
    store: S,
}

impl<S> CredentialManager<S>
where
    S: SecretStore,
{
    /// Wraps a secret store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stores a passphrase. An existing record is replaced only with `overwrite`.
    pub fn store(&self, name: &str, passphrase: &Passphrase, overwrite: bool) -> Result<()> {
        if self.store.exists(name)? {
            if !overwrite {
                return Err(CryptainerError::DuplicateEntry(name.to_owned()));
            }
            self.store.update(name, passphrase)?;
            info!(volume = name, "replaced stored passphrase");
            return Ok(());
        }
        self.store.put(name, passphrase)?;
        info!(volume = name, "stored passphrase");
        Ok(())
    }

    /// Looks a passphrase up by volume identity.
    pub fn retrieve(&self, name: &str) -> Result<Option<Passphrase>> {
        let found = self.store.get(name)?;
        debug!(volume = name, found = found.is_some(), "credential lookup");
        Ok(found)
    }

    /// Fails with `DuplicateEntry` when a record already exists.
    pub fn ensure_absent(&self, name: &str) -> Result<()> {
        if self.store.exists(name)? {
            return Err(CryptainerError::DuplicateEntry(name.to_owned()));
        }
        Ok(())
    }

    /// Underlying store.
    pub fn secret_store(&self) -> &S {
        &self.store
    }
}
