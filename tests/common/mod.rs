#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use cryptainer::types::Passphrase;

pub mod mocks;

/// Writes a script and marks it executable.
pub fn write_executable(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
}

/// Builds a passphrase from a literal.
pub fn passphrase(value: &str) -> Passphrase {
    Passphrase::new(value.to_owned())
}

/// Argument log written by every fake tool in `bin_dir`.
pub fn tool_log(bin_dir: &Path, tool: &str) -> PathBuf {
    bin_dir.join(format!("{tool}.log"))
}

/// Reads a tool log, empty when the tool never ran.
pub fn read_tool_log(bin_dir: &Path, tool: &str) -> String {
    fs::read_to_string(tool_log(bin_dir, tool)).unwrap_or_default()
}

/// Fake `mountpoint`: a directory counts as mounted while it holds `.mounted`.
pub fn install_fake_mountpoint(bin_dir: &Path) {
    write_executable(
        &bin_dir.join("mountpoint"),
        r#"#!/usr/bin/env bash
set -euo pipefail
if [[ "$1" != "-q" ]]; then
  exit 2
fi
if [[ -f "$2/.mounted" ]]; then
  exit 0
fi
exit 1
"#,
    );
}

/// Fake `gocryptfs` and `fusermount`.
///
/// `-init` stores the stdin passphrase in `<cipher>/.pass`; mounting compares
/// against it and exits 12 on mismatch. A passphrase of `fail-init` makes
/// `-init` leave a partial directory behind and fail. A `.busy` file in the
/// mount point makes `fusermount -u` report the device as busy.
pub fn install_fake_gocryptfs(bin_dir: &Path) {
    let gocryptfs = r#"#!/usr/bin/env bash
set -euo pipefail
echo "$*" >> "__LOG__"
pass=""
read -r pass || true
init=0
for arg in "$@"; do
  if [[ "$arg" == "-init" ]]; then
    init=1
  fi
done
if [[ "$init" == "1" ]]; then
  cipher="${@: -1}"
  if [[ "$pass" == "fail-init" ]]; then
    touch "$cipher/gocryptfs.diriv"
    echo "gocryptfs: init failed" >&2
    exit 1
  fi
  touch "$cipher/gocryptfs.conf"
  printf '%s' "$pass" > "$cipher/.pass"
  exit 0
fi
cipher="${@: -2:1}"
mountpoint="${@: -1}"
if [[ "$pass" != "$(cat "$cipher/.pass")" ]]; then
  echo "Password incorrect." >&2
  exit 12
fi
touch "$mountpoint/.mounted"
"#;
    write_executable(
        &bin_dir.join("gocryptfs"),
        &gocryptfs.replace("__LOG__", &tool_log(bin_dir, "gocryptfs").to_string_lossy()),
    );

    let fusermount = r#"#!/usr/bin/env bash
set -euo pipefail
echo "$*" >> "__LOG__"
target="$2"
if [[ -f "$target/.busy" ]]; then
  echo "fusermount: failed to unmount $target: Device or resource busy" >&2
  exit 1
fi
if [[ ! -f "$target/.mounted" ]]; then
  echo "fusermount: entry for $target not found in /etc/mtab" >&2
  exit 1
fi
rm -f "$target/.mounted"
"#;
    write_executable(
        &bin_dir.join("fusermount"),
        &fusermount.replace("__LOG__", &tool_log(bin_dir, "fusermount").to_string_lossy()),
    );
}

/// Fake `veracrypt` text interface.
///
/// `--create` writes the stdin passphrase as the container body; mounting
/// compares against it. A passphrase of `fail-create` leaves a partial file
/// and fails.
pub fn install_fake_veracrypt(bin_dir: &Path) {
    let veracrypt = r#"#!/usr/bin/env bash
set -euo pipefail
echo "$*" >> "__LOG__"
create=""
dismount=""
previous=""
for arg in "$@"; do
  if [[ "$previous" == "--create" ]]; then
    create="$arg"
  fi
  if [[ "$previous" == "--dismount" ]]; then
    dismount="$arg"
  fi
  previous="$arg"
done
if [[ -n "$dismount" ]]; then
  if [[ -f "$dismount/.busy" ]]; then
    echo "Error: umount: $dismount: target is busy." >&2
    exit 1
  fi
  if [[ ! -f "$dismount/.mounted" ]]; then
    echo "Error: No such volume is mounted." >&2
    exit 1
  fi
  rm -f "$dismount/.mounted"
  exit 0
fi
pass=""
read -r pass || true
if [[ -n "$create" ]]; then
  if [[ "$pass" == "fail-create" ]]; then
    printf 'partial' > "$create"
    echo "Error: Not enough free space." >&2
    exit 1
  fi
  printf '%s' "$pass" > "$create"
  exit 0
fi
container="${@: -2:1}"
mountpoint="${@: -1}"
if [[ "$pass" != "$(cat "$container")" ]]; then
  echo "Error: Incorrect password or not a VeraCrypt volume." >&2
  exit 1
fi
touch "$mountpoint/.mounted"
"#;
    write_executable(
        &bin_dir.join("veracrypt"),
        &veracrypt.replace("__LOG__", &tool_log(bin_dir, "veracrypt").to_string_lossy()),
    );
}
