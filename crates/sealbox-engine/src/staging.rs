//! Per-job staging directory.
//!
//! `cp -a` carries input modes into staging, so a read-only input folder
//! yields a staged folder its own job cannot empty. [`StagingDir`] restores
//! owner `rwx` on every staged directory before removal, on every exit path.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl StagingDir {
    pub fn create_in(root: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("sealbox_bundle_")
            .tempdir_in(root)?;
        tracing::debug!(staging = %dir.path().display(), "staging directory created");
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove now. Whether the directory is gone.
    pub fn remove(mut self) -> bool {
        self.remove_in_place()
    }

    fn remove_in_place(&mut self) -> bool {
        let Some(dir) = self.dir.take() else {
            return true;
        };
        make_dirs_writable(&self.path);
        match dir.close() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    staging = %self.path.display(),
                    "CRITICAL: staging directory holding plaintext copies could not be removed: {e}"
                );
                false
            }
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        self.remove_in_place();
    }
}

/// Add owner `rwx` to `root` and every directory below it. Symlinks are not
/// followed. Parents are fixed before their contents are listed.
pub fn make_dirs_writable(root: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("cannot reach entry while restoring permissions: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let mode = match entry.metadata() {
                Ok(meta) => meta.permissions().mode(),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), "cannot stat directory: {e}");
                    continue;
                }
            };
            if mode & 0o700 != 0o700 {
                let fixed = std::fs::Permissions::from_mode(mode | 0o700);
                if let Err(e) = std::fs::set_permissions(entry.path(), fixed) {
                    tracing::warn!(path = %entry.path().display(), "cannot restore directory permissions: {e}");
                }
            }
        }
    }
    #[cfg(not(unix))]
    let _ = root;
}
