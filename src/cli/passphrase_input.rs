use std::io::{self, BufRead};

use zeroize::Zeroizing;

use crate::{
    credentials::PassphrasePrompt,
    error::{CryptainerError, Result},
    types::Passphrase,
};

use super::output;

/// Reads passphrases as single lines from stdin.
///
/// The label is echoed to stderr only when stdin is a terminal, so piped
/// input (`printf 'secret\n' | cryptainer mount alpha`) stays quiet.
pub(crate) struct StdinPrompt {
    interactive: bool,
}

impl StdinPrompt {
    pub(crate) fn new() -> Self {
        Self {
            interactive: atty::is(atty::Stream::Stdin),
        }
    }
}

impl PassphrasePrompt for StdinPrompt {
    fn prompt(&self, label: &str) -> Result<Passphrase> {
        if self.interactive {
            output::stderr_prompt(&format!("{label}: "))?;
        }
        let stdin = io::stdin();
        read_passphrase_line(&mut stdin.lock(), label)
    }
}

pub(crate) fn read_passphrase_line(reader: &mut impl BufRead, label: &str) -> Result<Passphrase> {
    let mut line = Zeroizing::new(String::new());
    let read = reader.read_line(&mut line)?;
    if read == 0 {
        return Err(CryptainerError::InvalidInput(format!(
            "{label}: no passphrase on stdin"
        )));
    }
    let trimmed = line.trim_end_matches(|character: char| character == '\r' || character == '\n');
    if trimmed.is_empty() {
        return Err(CryptainerError::InvalidInput(format!(
            "{label}: passphrase cannot be empty"
        )));
    }
    Ok(Passphrase::new(trimmed.to_owned()))
}
