use rand::{rngs::OsRng, Rng};

use crate::{
    config::MIN_PASSGEN_LENGTH,
    error::{CryptainerError, Result},
    types::Passphrase,
};

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PUNCTUATION: &[u8] = b"!#$%&()*+,-./:;<=>?@[]^_{|}~";

/// Random passphrase generator backed by the operating system RNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassphraseGenerator {
    length: usize,
    punctuation: bool,
}

impl PassphraseGenerator {
    /// Alphanumeric generator producing `length` characters.
    pub fn new(length: usize) -> Result<Self> {
        if length < MIN_PASSGEN_LENGTH {
            return Err(CryptainerError::InvalidInput(format!(
                "passphrase length must be at least {MIN_PASSGEN_LENGTH}"
            )));
        }
        Ok(Self {
            length,
            punctuation: false,
        })
    }

    /// Adds ASCII punctuation to the alphabet.
    pub fn with_punctuation(mut self, enabled: bool) -> Self {
        self.punctuation = enabled;
        self
    }

    /// Configured length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Draws a fresh passphrase.
    pub fn generate(&self) -> Passphrase {
        let alphabet = self.alphabet();
        let mut rng = OsRng;
        let value = (0..self.length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect::<String>();
        Passphrase::new(value)
    }

    fn alphabet(&self) -> Vec<u8> {
        let mut alphabet = ALPHANUMERIC.to_vec();
        if self.punctuation {
            alphabet.extend_from_slice(PUNCTUATION);
        }
        alphabet
    }
}

/// Generates one alphanumeric passphrase.
pub fn generate(length: usize) -> Result<Passphrase> {
    Ok(PassphraseGenerator::new(length)?.generate())
}
