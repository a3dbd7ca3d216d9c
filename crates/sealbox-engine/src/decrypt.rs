//! Decryption workflow, one file at a time.
//!
//! Each file is decrypted into a hidden `.<name>.tmp` sibling. Failures
//! count against the file's rate-limit record. Gzip output is treated as a
//! bundle and extracted beside the encrypted file after its member list has
//! been validated; anything else is renamed to the final name.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sealbox_core::config::SealConfig;
use sealbox_core::error::USER_MESSAGE_LIMIT;
use sealbox_core::types::{
    CommandMode, DecryptReport, AGE_HEADER_SCAN, AGE_MAGIC, DECRYPTED_SUFFIX, ENCRYPTED_SUFFIX,
};
use sealbox_core::{SealError, SealResult};
use sealbox_secrets::{secure_delete, Passphrase};

use crate::archive::{is_gzip, ArchiveBundler};
use crate::inject::SecretInjector;
use crate::path_guard::PathValidator;
use crate::publish::unique_sibling;
use crate::rate_limit::RateLimiter;

/// Whether the first bytes of `path` carry the encrypted-file marker.
pub fn verify_age_file(path: &Path) -> bool {
    let mut header = Vec::with_capacity(AGE_HEADER_SCAN);
    let read = File::open(path).and_then(|f| f.take(AGE_HEADER_SCAN as u64).read_to_end(&mut header));
    match read {
        Ok(_) => header.windows(AGE_MAGIC.len()).any(|w| w == AGE_MAGIC),
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot read header: {e}");
            false
        }
    }
}

/// `doc.txt.age` → `doc.txt`, anything else → `<name>.decrypted`.
pub fn decrypted_name(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(stem) if !stem.is_empty() => path.with_file_name(stem),
        _ => path.with_file_name(format!("{name}{DECRYPTED_SUFFIX}")),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone)]
pub struct DecryptionOrchestrator {
    bundler: ArchiveBundler,
    injector: SecretInjector,
    validator: PathValidator,
}

impl DecryptionOrchestrator {
    pub fn new(config: &SealConfig) -> Self {
        Self {
            bundler: ArchiveBundler::new(config),
            injector: SecretInjector::new(config),
            validator: PathValidator::default(),
        }
    }

    /// Checks run before any password is requested: no file may be locked
    /// out, and every file must carry the marker. Invalid files are reported
    /// together.
    pub fn preflight(&self, paths: &[PathBuf], limiter: &mut RateLimiter) -> SealResult<()> {
        if paths.is_empty() {
            return Err(SealError::validation("nothing to decrypt"));
        }
        for path in paths {
            limiter.check(path).into_result()?;
        }

        let invalid: Vec<String> = paths
            .iter()
            .filter(|p| !verify_age_file(p))
            .map(|p| display_name(p))
            .collect();
        if !invalid.is_empty() {
            return Err(SealError::validation(format!(
                "not valid encrypted files: {}",
                invalid.join(", ")
            )));
        }
        Ok(())
    }

    pub async fn run(&self, paths: &[PathBuf], passphrase: &Passphrase, limiter: &mut RateLimiter) -> DecryptReport {
        let mut report = DecryptReport::default();
        for path in paths {
            match self.decrypt_one(path, passphrase, limiter).await {
                Ok(output) => report.record_success(output),
                Err(e) => {
                    report.record_failure(format!(
                        "{}: {}",
                        display_name(path),
                        e.user_message(USER_MESSAGE_LIMIT)
                    ));
                }
            }
        }
        tracing::info!(succeeded = report.succeeded, failed = report.failed, "decryption finished");
        report
    }

    async fn decrypt_one(&self, path: &Path, passphrase: &Passphrase, limiter: &mut RateLimiter) -> SealResult<PathBuf> {
        limiter.check(path).into_result()?;
        if !verify_age_file(path) {
            return Err(SealError::validation("not a valid encrypted file"));
        }

        let dir = path
            .parent()
            .ok_or_else(|| SealError::validation(format!("no parent directory: {}", path.display())))?;
        let temp = dir.join(format!(".{}.tmp", display_name(path)));

        if let Err(e) = self
            .injector
            .run_with_secret(CommandMode::Decrypt, path, &temp, passphrase)
            .await
        {
            limiter.record_failure(path);
            discard(&temp);
            return Err(e);
        }
        limiter.clear(path);

        let archive = match is_gzip(&temp) {
            Ok(archive) => archive,
            Err(e) => {
                discard(&temp);
                return Err(e.into());
            }
        };

        if archive {
            let extracted = if self.validator.is_safe(dir) {
                self.bundler.extract(&temp, dir).await
            } else {
                Err(SealError::validation(format!(
                    "refusing to extract into {}",
                    dir.display()
                )))
            };
            discard(&temp);
            extracted?;
            Ok(dir.to_path_buf())
        } else {
            let target = unique_sibling(&decrypted_name(path));
            if let Err(e) = std::fs::rename(&temp, &target) {
                discard(&temp);
                return Err(e.into());
            }
            tracing::info!(output = %target.display(), "file decrypted");
            Ok(target)
        }
    }
}

/// Remove a decrypted temporary, which may hold plaintext.
fn discard(temp: &Path) {
    if std::fs::symlink_metadata(temp).is_ok() {
        secure_delete(temp);
    }
}
