//! Write-then-publish: move a finished artifact to its user-visible path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Move `temp` to `destination`.
///
/// A plain rename is tried first. When the two paths sit on different
/// filesystems the file is copied into a hidden sibling of `destination`,
/// fsynced, and renamed into place, so a partial copy is never visible under
/// the final name. The source is removed afterwards.
pub fn publish(temp: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(temp, destination) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(dest = %destination.display(), "rename crosses filesystems, copying");
            copy_then_rename(temp, destination)?;
            fs::remove_file(temp)
        }
        Err(e) => Err(e),
    }
}

fn copy_then_rename(temp: &Path, destination: &Path) -> io::Result<()> {
    let partial = partial_sibling(destination)?;
    let result = (|| {
        fs::copy(temp, &partial)?;
        fs::File::open(&partial)?.sync_all()?;
        fs::rename(&partial, destination)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn partial_sibling(destination: &Path) -> io::Result<PathBuf> {
    let name = destination.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name")
    })?;
    Ok(destination.with_file_name(format!(".{}.partial", name.to_string_lossy())))
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    // EXDEV
    e.raw_os_error() == Some(18)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

/// `candidate` if free, otherwise `<stem>_<n>.<ext>` beside it.
pub fn unique_sibling(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }
    let name = candidate
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name.as_str(), ""),
    };
    (1u32..)
        .map(|n| candidate.with_file_name(format!("{stem}_{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| candidate.to_path_buf())
}
