use std::{
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use tracing::debug;

use crate::{
    credentials::{PassphrasePrompt, SecretStore},
    error::{CryptainerError, Result},
    types::Passphrase,
    volume::exec::ToolInvocation,
};

/// Environment variable holding the database master password.
pub const MASTER_PASSWORD_ENV_VAR: &str = "CRYPTAINER_KEEPASS_PASSWORD";
/// Group holding every volume entry.
pub const ENTRY_GROUP: &str = "cryptainer";

const KEEPASS_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one `keepassxc-cli` run.
#[derive(Debug, Clone)]
pub struct KeepassOutput {
    /// Exit status code.
    pub status_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Executor abstraction for `keepassxc-cli` commands.
pub trait KeepassExecutor: Send + Sync {
    /// Runs the CLI with `args`, writing each secret line to stdin.
    fn exec(&self, args: &[String], stdin_lines: &[&Passphrase]) -> Result<KeepassOutput>;
}

/// Executor that calls the system `keepassxc-cli` binary.
pub struct SystemKeepassExecutor {
    binary: String,
}

impl SystemKeepassExecutor {
    /// Uses `keepassxc-cli` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("keepassxc-cli")
    }

    /// Uses a custom binary path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SystemKeepassExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepassExecutor for SystemKeepassExecutor {
    fn exec(&self, args: &[String], stdin_lines: &[&Passphrase]) -> Result<KeepassOutput> {
        let output = ToolInvocation::new(&self.binary, KEEPASS_TIMEOUT)
            .args(args)
            .stdin_lines(stdin_lines)
            .run()?;
        Ok(KeepassOutput {
            status_code: output.exit_code.unwrap_or(1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Where the database master password comes from.
pub enum MasterPassword {
    /// Known up front, e.g. from the environment.
    Fixed(Passphrase),
    /// Asked for on first use.
    Prompt(Box<dyn PassphrasePrompt>),
}

/// Secret store backed by a KeePass database through `keepassxc-cli`.
pub struct KeepassStore {
    executor: Box<dyn KeepassExecutor>,
    database: PathBuf,
    keyfile: Option<PathBuf>,
    master_source: MasterPassword,
    master: Mutex<Option<Passphrase>>,
}

impl KeepassStore {
    /// Creates a store using the system executor.
    pub fn new(
        database: impl Into<PathBuf>,
        keyfile: Option<PathBuf>,
        master: MasterPassword,
    ) -> Self {
        Self::with_executor(
            Box::new(SystemKeepassExecutor::new()),
            database,
            keyfile,
            master,
        )
    }

    /// Creates a store with a custom executor, useful for tests.
    pub fn with_executor(
        executor: Box<dyn KeepassExecutor>,
        database: impl Into<PathBuf>,
        keyfile: Option<PathBuf>,
        master: MasterPassword,
    ) -> Self {
        Self {
            executor,
            database: database.into(),
            keyfile,
            master_source: master,
            master: Mutex::new(None),
        }
    }

    /// Database file.
    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Entry path used for one volume.
    pub fn entry_path(name: &str) -> String {
        format!("{ENTRY_GROUP}/{name}")
    }

    fn master_password(&self) -> Result<Passphrase> {
        let mut cached = self.master.lock().map_err(|_| {
            CryptainerError::StoreUnavailable("master password lock poisoned".to_owned())
        })?;
        if let Some(master) = cached.as_ref() {
            return Ok(master.clone());
        }
        let master = match &self.master_source {
            MasterPassword::Fixed(master) => master.clone(),
            MasterPassword::Prompt(prompt) => {
                prompt.prompt(&format!("KeePass password for {}", self.database.display()))?
            }
        };
        *cached = Some(master.clone());
        Ok(master)
    }

    fn command(&self, subcommand: &str, extra: &[&str], target: &str) -> Vec<String> {
        let mut args = vec![subcommand.to_owned(), "-q".to_owned()];
        args.extend(extra.iter().map(|value| (*value).to_owned()));
        if let Some(keyfile) = self.keyfile.as_ref() {
            args.push("-k".to_owned());
            args.push(keyfile.display().to_string());
        }
        args.push(self.database.display().to_string());
        args.push(target.to_owned());
        args
    }

    fn run(&self, args: &[String], entry_secret: Option<&Passphrase>) -> Result<KeepassOutput> {
        let master = self.master_password()?;
        let mut lines = vec![&master];
        if let Some(secret) = entry_secret {
            lines.push(secret);
        }
        debug!(args = ?args.first(), database = %self.database.display(), "running keepassxc-cli");
        self.executor.exec(args, &lines)
    }

    fn ensure_group(&self) -> Result<()> {
        let output = self.run(&self.command("mkdir", &[], ENTRY_GROUP), None)?;
        if output.status_code == 0 || output.stderr.to_ascii_lowercase().contains("already exists") {
            return Ok(());
        }
        Err(store_failure(&output))
    }
}

impl SecretStore for KeepassStore {
    fn put(&self, name: &str, passphrase: &Passphrase) -> Result<()> {
        self.ensure_group()?;
        let output = self.run(
            &self.command("add", &["-p"], &Self::entry_path(name)),
            Some(passphrase),
        )?;
        if output.status_code == 0 {
            return Ok(());
        }
        Err(store_failure(&output))
    }

    fn get(&self, name: &str) -> Result<Option<Passphrase>> {
        let output = self.run(
            &self.command("show", &["-a", "Password"], &Self::entry_path(name)),
            None,
        )?;
        if output.status_code == 0 {
            let value = output
                .stdout
                .trim_end_matches(|character: char| character == '\r' || character == '\n')
                .to_owned();
            return Ok(Some(Passphrase::new(value)));
        }
        if is_missing_entry(&output) {
            return Ok(None);
        }
        Err(store_failure(&output))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let output = self.run(
            &self.command("show", &["-a", "Title"], &Self::entry_path(name)),
            None,
        )?;
        if output.status_code == 0 {
            return Ok(true);
        }
        if is_missing_entry(&output) {
            return Ok(false);
        }
        Err(store_failure(&output))
    }

    fn update(&self, name: &str, passphrase: &Passphrase) -> Result<()> {
        let output = self.run(
            &self.command("edit", &["-p"], &Self::entry_path(name)),
            Some(passphrase),
        )?;
        if output.status_code == 0 {
            return Ok(());
        }
        if is_missing_entry(&output) {
            return Err(CryptainerError::NotFound(name.to_owned()));
        }
        Err(store_failure(&output))
    }
}

fn is_missing_entry(output: &KeepassOutput) -> bool {
    output
        .stderr
        .to_ascii_lowercase()
        .contains("could not find entry")
}

fn store_failure(output: &KeepassOutput) -> CryptainerError {
    let detail = if output.stderr.trim().is_empty() {
        format!("keepassxc-cli exited with status {}", output.status_code)
    } else {
        output.stderr.trim().to_owned()
    };
    CryptainerError::StoreUnavailable(detail)
}
