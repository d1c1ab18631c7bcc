use std::{fs, path::Path};

use tracing::debug;

use crate::error::Result;

/// Recursively copies the contents of `template` into `destination`.
///
/// Existing files in `destination` are overwritten. Symlinks are recreated
/// as links rather than followed. Returns the number of files copied.
pub fn copy_template(template: &Path, destination: &Path) -> Result<usize> {
    let mut copied = 0;
    copy_tree(template, destination, &mut copied)?;
    debug!(
        template = %template.display(),
        destination = %destination.display(),
        copied,
        "copied template"
    );
    Ok(copied)
}

fn copy_tree(source: &Path, destination: &Path, copied: &mut usize) -> Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = destination.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target, copied)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
            *copied += 1;
        } else {
            fs::copy(entry.path(), &target)?;
            *copied += 1;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(source)?;
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target)?;
    Ok(())
}
