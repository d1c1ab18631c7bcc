use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const MAX_VOLUME_NAME_LENGTH: usize = 128;

/// Volume identity: a base name without extension or path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeName(String);

impl VolumeName {
    /// Creates a validated volume name.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > MAX_VOLUME_NAME_LENGTH {
            return Err(ValidationError::InvalidName);
        }
        if name.contains("..") || name.starts_with('.') || name.contains('/') {
            return Err(ValidationError::PathTraversal);
        }
        if !name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || "_.-".contains(character))
        {
            return Err(ValidationError::InvalidCharacter);
        }
        Ok(Self(name.to_owned()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VolumeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passphrase wrapper that avoids accidental logging.
pub struct Passphrase {
    inner: SecretString,
}

impl Passphrase {
    /// Wraps a passphrase string.
    pub fn new(value: String) -> Self {
        Self {
            inner: SecretString::new(value),
        }
    }

    /// Builds a passphrase from raw UTF-8 bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, std::string::FromUtf8Error> {
        String::from_utf8(bytes).map(Self::new)
    }

    /// Exposes the passphrase to a closure.
    pub fn expose<F, R>(&self, function: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        function(self.inner.expose_secret())
    }

    /// Returns true when the passphrase is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }
}

impl Clone for Passphrase {
    fn clone(&self) -> Self {
        Self::new(self.inner.expose_secret().clone())
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}
