//! Owner-only temporary files with guaranteed erasure.
//!
//! A [`SecureTempResource`] is erased when its owner calls [`SecureTempResource::erase`]
//! or, failing that, when it is dropped. Erasure is best-effort multi-pass:
//!
//! ```text
//! [zero pass over the sensitive length]      (size-sensitive resources only)
//! 3 random passes + final zero pass, fsync each, unlink
//!   └─ on failure: zero overwrite + fsync, plain delete     (degraded, warn)
//!        └─ on failure: error-level log                      (secret may remain)
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;

use sealbox_core::SealResult;

/// Random overwrite passes before the final zero pass
pub const SHRED_PASSES: usize = 3;

const CHUNK: usize = 64 * 1024;

/// How an erasure ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    /// Multi-pass overwrite and unlink succeeded
    Shredded,
    /// The file is gone, but only via a fallback path
    Degraded,
    /// The file could not be deleted; secret material may remain on disk
    Failed,
}

impl EraseOutcome {
    pub fn is_removed(self) -> bool {
        !matches!(self, EraseOutcome::Failed)
    }
}

/// A temporary file holding secret- or plaintext-adjacent bytes.
///
/// Exclusively owned by the operation that created it; never handed out
/// beyond that scope except through `path()`.
#[derive(Debug)]
pub struct SecureTempResource {
    path: PathBuf,
    sensitive_len: Option<usize>,
    owner: &'static str,
    erased: bool,
}

impl SecureTempResource {
    /// Create an empty `0600` file in `dir`.
    pub fn create(dir: &Path, prefix: &str, suffix: &str, owner: &'static str) -> SealResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(suffix);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o600));
        }

        let file = builder.tempfile_in(dir)?;
        let (_handle, path) = file.keep().map_err(|e| e.error)?;

        tracing::debug!(owner, path = %path.display(), "secure temp resource created");
        Ok(Self {
            path,
            sensitive_len: None,
            owner,
            erased: false,
        })
    }

    /// Same as [`create`](Self::create), in the system temp directory.
    pub fn create_in_temp(prefix: &str, suffix: &str, owner: &'static str) -> SealResult<Self> {
        Self::create(&std::env::temp_dir(), prefix, suffix, owner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Mark the resource as size-sensitive: erasure starts with a zero
    /// pass of exactly `len` bytes.
    pub fn set_sensitive_len(&mut self, len: usize) {
        self.sensitive_len = Some(len);
    }

    pub fn erase(mut self) -> EraseOutcome {
        self.erase_in_place()
    }

    fn erase_in_place(&mut self) -> EraseOutcome {
        self.erased = true;

        if !self.path.exists() {
            return EraseOutcome::Shredded;
        }

        if let Some(len) = self.sensitive_len {
            if let Err(e) = zero_fill(&self.path, len as u64) {
                tracing::warn!(owner = self.owner, "zero overwrite of sensitive temp file failed: {e}");
            }
        }

        let outcome = secure_delete(&self.path);
        if outcome == EraseOutcome::Degraded {
            tracing::warn!(owner = self.owner, "secure temp file required fallback deletion");
        }
        outcome
    }
}

impl Drop for SecureTempResource {
    fn drop(&mut self) {
        if !self.erased {
            self.erase_in_place();
        }
    }
}

/// Shred and unlink `path`, falling back to zero-overwrite + delete.
///
/// Symlinks are unlinked without touching their target. The failure to
/// remove the file at all is logged at error level.
pub fn secure_delete(path: &Path) -> EraseOutcome {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return EraseOutcome::Shredded,
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot stat file for secure delete: {e}");
            return force_remove(path);
        }
    };

    if meta.file_type().is_symlink() {
        return match fs::remove_file(path) {
            Ok(()) => EraseOutcome::Shredded,
            Err(_) => force_remove(path),
        };
    }

    match shred_file(path, SHRED_PASSES) {
        Ok(()) => EraseOutcome::Shredded,
        Err(e) => {
            tracing::warn!(path = %path.display(), "multi-pass overwrite failed: {e}");
            if let Ok(meta) = fs::metadata(path) {
                if let Err(e) = zero_fill(path, meta.len()) {
                    tracing::warn!(path = %path.display(), "fallback zero overwrite failed: {e}");
                }
            }
            force_remove(path)
        }
    }
}

/// Overwrite `path` with `passes` random passes and a final zero pass, then unlink.
pub fn shred_file(path: &Path, passes: usize) -> io::Result<()> {
    let len = fs::metadata(path)?.len();
    let mut file = OpenOptions::new().write(true).open(path)?;
    let mut rng = rand::thread_rng();

    for _ in 0..passes {
        overwrite(&mut file, len, |buf| rng.fill_bytes(buf))?;
    }
    overwrite(&mut file, len, |buf| buf.fill(0))?;
    drop(file);

    fs::remove_file(path)
}

fn zero_fill(path: &Path, len: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    overwrite(&mut file, len, |buf| buf.fill(0))
}

fn overwrite(file: &mut fs::File, len: u64, mut fill: impl FnMut(&mut [u8])) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = vec![0u8; CHUNK.min(len as usize).max(1)];
    let mut remaining = len;

    while remaining > 0 {
        let n = (remaining as usize).min(buf.len());
        fill(&mut buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    file.flush()?;
    file.sync_all()
}

fn force_remove(path: &Path) -> EraseOutcome {
    match fs::remove_file(path) {
        Ok(()) => EraseOutcome::Degraded,
        Err(e) if e.kind() == io::ErrorKind::NotFound => EraseOutcome::Degraded,
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                "CRITICAL: could not delete file holding sensitive data: {e}"
            );
            EraseOutcome::Failed
        }
    }
}
