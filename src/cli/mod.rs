mod commands;
mod output;
mod passphrase_input;
mod runtime;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::{CryptainerError, Result};

const VOLUME_NAME_ARG_HELP: &str =
    "Volume name (example: `alpha`). Allowed characters: letters, digits, `.`, `_`, and `-`.";
const ERROR_CODE_ARG_HELP: &str = "Error code from CLI stderr (example: `E302`).";
const CLI_AFTER_HELP: &str = r#"Examples:
  cryptainer list
  cryptainer create -t gocryptfs -a alpha
  cryptainer create -t veracrypt -s 512M -k beta
  cryptainer mount alpha beta
  cryptainer umount alpha beta
  cryptainer prune --max-age 90
  cryptainer clean
  cryptainer explain E302

Config:
  --config PATH, then CRYPTAINER_CONFIG, then ~/.cryptainer/config.toml.
  A missing default config is written as a template on first run.

Diagnostics:
  Error codes are shown in stderr output, for example `error[E302]: ...`.
  Set CRYPTAINER_LOG (for example `debug`) or pass --debug for tracing output.
"#;
const LIST_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer list
  cryptainer list --json

Output:
  alpha (GoCryptFS, unmounted)
  beta (VeraCrypt, mounted)
  notes.txt (unrecognized)
"#;
const CREATE_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer create -t gocryptfs alpha
  cryptainer create -t gocryptfs -a -T alpha
  cryptainer create -t veracrypt -s 512M -k beta
  cryptainer create -t gocryptfs --generate gamma

Notes:
  - Types: `gocryptfs`, `veracrypt` (exact, case-sensitive).
  - VeraCrypt requires --size (`<digits>[K|M|G|T]`); gocryptfs ignores it.
  - --use-keepass generates the passphrase and stores it under `cryptainer/<name>`.
  - --generate prints a generated passphrase once without storing it.
  - Otherwise the passphrase is read as one line from stdin.
"#;
const MOUNT_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer mount alpha
  cryptainer mount alpha beta gamma

Notes:
  - Each name is attempted once; the exit code is 1 when any name fails.
  - Stored KeePass passphrases are used first, then stdin.
"#;
const UMOUNT_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer umount alpha
  cryptainer unmount alpha beta
"#;
const PRUNE_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer prune
  cryptainer prune --max-age 30
  cryptainer prune --max-age 30 --delete

Notes:
  - Without --delete only candidates are reported.
  - Mounted volumes are never pruned.
  - `prune_max_age = 0` disables pruning.
"#;
const CLEAN_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer clean

Notes:
  - Unmounts volumes that are not in use and removes empty mount directories.
  - Running it again with nothing to do is not an error.
"#;
const EXPLAIN_COMMAND_AFTER_HELP: &str = r#"Examples:
  cryptainer explain E302
  cryptainer explain e401

Common flow:
  1) Run a command and read the stderr code, for example `error[E302]: ...`.
  2) Run `cryptainer explain E302`.
  3) Apply the suggested recovery steps.
"#;

/// Top-level command line parser.
#[derive(Debug, Parser)]
#[command(
    name = "cryptainer",
    version,
    about = "Create, mount and retire gocryptfs and VeraCrypt volumes.",
    after_help = CLI_AFTER_HELP,
    arg_required_else_help = true,
    next_line_help = true
)]
pub struct Cli {
    /// Config file override path.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Enable debug logging on stderr.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lists containers with their type and mount status.
    #[command(visible_alias = "ls", after_help = LIST_COMMAND_AFTER_HELP)]
    List {
        /// Print structured JSON output.
        #[arg(long)]
        json: bool,
    },
    /// Creates a new encrypted container.
    #[command(after_help = CREATE_COMMAND_AFTER_HELP)]
    Create {
        /// Volume type identifier.
        #[arg(short = 't', long = "type")]
        volume_type: String,
        /// Container size, for example `512M`.
        #[arg(short, long)]
        size: Option<String>,
        /// Mount the volume right after creation.
        #[arg(short, long)]
        auto_mount: bool,
        /// Generate the passphrase and store it in KeePass.
        #[arg(short = 'k', long)]
        use_keepass: bool,
        /// Copy the configured template into the new mount.
        #[arg(short = 'T', long, requires = "auto_mount")]
        template: bool,
        /// Generate a passphrase and print it once.
        #[arg(long, conflicts_with = "use_keepass")]
        generate: bool,
        /// Volume name.
        #[arg(help = VOLUME_NAME_ARG_HELP)]
        name: String,
    },
    /// Mounts one or more volumes.
    #[command(after_help = MOUNT_COMMAND_AFTER_HELP)]
    Mount {
        /// Volume names.
        #[arg(required = true, help = VOLUME_NAME_ARG_HELP)]
        names: Vec<String>,
    },
    /// Unmounts one or more volumes.
    #[command(visible_alias = "unmount", after_help = UMOUNT_COMMAND_AFTER_HELP)]
    Umount {
        /// Volume names.
        #[arg(required = true, help = VOLUME_NAME_ARG_HELP)]
        names: Vec<String>,
    },
    /// Reports, and optionally deletes, volumes unused for too long.
    #[command(after_help = PRUNE_COMMAND_AFTER_HELP)]
    Prune {
        /// Age threshold in days, overriding `prune_max_age`.
        #[arg(long)]
        max_age: Option<u64>,
        /// Delete the reported containers.
        #[arg(long)]
        delete: bool,
    },
    /// Unmounts idle volumes and removes stale mount directories.
    #[command(after_help = CLEAN_COMMAND_AFTER_HELP)]
    Clean,
    /// Explains a stable error code with recovery guidance.
    #[command(after_help = EXPLAIN_COMMAND_AFTER_HELP)]
    Explain {
        /// Error code from stderr (for example: `E302`).
        #[arg(help = ERROR_CODE_ARG_HELP)]
        code: String,
    },
}

/// Runs CLI and returns process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    commands::run(cli)
}

/// Formats a fatal error as `error[CODE]: message`.
pub fn render_error(error: &CryptainerError) -> String {
    commands::render_error(None, error)
}
