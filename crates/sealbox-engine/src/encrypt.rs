//! Encryption workflow.
//!
//! ```text
//! validate inputs ─▶ stage (cp -a) ─▶ scrub staged files ─▶ tar.gz (outside staging)
//!   ─▶ encrypt into staging ─▶ drop archive ─▶ publish next to first input
//!   ─▶ [delete originals] ─▶ drop staging
//! ```
//!
//! The staging directory and the intermediate archive are scoped
//! temporaries: every early return removes them, read-only staged folders
//! included.

use std::path::{Path, PathBuf};

use sealbox_core::config::SealConfig;
use sealbox_core::types::{CommandMode, EncryptReport, ENCRYPTED_SUFFIX};
use sealbox_core::{SealError, SealResult};
use sealbox_secrets::{secure_delete, Passphrase};

use crate::archive::ArchiveBundler;
use crate::inject::SecretInjector;
use crate::path_guard::PathValidator;
use crate::publish::{publish, unique_sibling};
use crate::scrub::MetadataScrubber;
use crate::staging::{make_dirs_writable, StagingDir};

/// One user-initiated encryption request. The passphrase is zeroized when
/// the job is dropped.
#[derive(Debug)]
pub struct EncryptJob {
    pub paths: Vec<PathBuf>,
    pub passphrase: Passphrase,
    pub delete_originals: bool,
    /// Sanitize staged copies; only set when the sanitizer is available
    pub scrub: bool,
}

#[derive(Debug, Clone)]
pub struct EncryptionOrchestrator {
    bundler: ArchiveBundler,
    scrubber: MetadataScrubber,
    injector: SecretInjector,
    validator: PathValidator,
    temp_root: PathBuf,
}

impl EncryptionOrchestrator {
    pub fn new(config: &SealConfig) -> Self {
        Self {
            bundler: ArchiveBundler::new(config),
            scrubber: MetadataScrubber::new(config),
            injector: SecretInjector::new(config),
            validator: PathValidator::default(),
            temp_root: config.workspace.temp_root(),
        }
    }

    pub async fn run(&self, job: EncryptJob) -> SealResult<EncryptReport> {
        validate_inputs(&job.paths)?;
        let (out_dir, stem) = output_parts(&job.paths)?;

        let staging = StagingDir::create_in(&self.temp_root)?;
        let archive = tempfile::Builder::new()
            .prefix("sealbox_archive_")
            .suffix(".tar.gz")
            .tempfile_in(&self.temp_root)?
            .into_temp_path();

        self.bundler.stage(&job.paths, staging.path()).await?;

        let scrubbed = if job.scrub {
            Some(self.scrubber.scrub_tree(staging.path()).await)
        } else {
            None
        };

        self.bundler.bundle(staging.path(), &archive).await?;

        let staged_output = staging.path().join(format!("{stem}{ENCRYPTED_SUFFIX}"));
        let encrypted = self
            .injector
            .run_with_secret(CommandMode::Encrypt, &archive, &staged_output, &job.passphrase)
            .await;

        if let Err(e) = archive.close() {
            tracing::warn!("could not remove intermediate archive: {e}");
        }
        encrypted?;

        let destination = unique_sibling(&out_dir.join(format!("{stem}{ENCRYPTED_SUFFIX}")));
        publish(&staged_output, &destination)?;
        tracing::info!(
            items = job.paths.len(),
            dest = %destination.display(),
            "encrypted artifact published"
        );

        let originals_deleted = job.delete_originals && self.delete_originals(&job.paths);

        staging.remove();

        Ok(EncryptReport {
            items: job.paths.len(),
            destination,
            scrubbed,
            originals_deleted,
        })
    }

    /// Shred files, remove directories. Every path is re-validated first.
    /// Returns whether all originals are gone.
    fn delete_originals(&self, paths: &[PathBuf]) -> bool {
        let mut all_removed = true;
        for path in paths {
            if !self.validator.is_safe(path) {
                tracing::warn!(path = %path.display(), "original kept: failed path validation");
                all_removed = false;
                continue;
            }
            let is_dir = std::fs::symlink_metadata(path)
                .map(|m| m.is_dir())
                .unwrap_or(false);
            let removed = if is_dir {
                make_dirs_writable(path);
                match std::fs::remove_dir_all(path) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(path = %path.display(), "could not remove original directory: {e}");
                        false
                    }
                }
            } else {
                secure_delete(path).is_removed()
            };
            all_removed &= removed;
        }
        all_removed
    }
}

fn validate_inputs(paths: &[PathBuf]) -> SealResult<()> {
    if paths.is_empty() {
        return Err(SealError::validation("nothing to encrypt"));
    }
    for path in paths {
        if !path.is_absolute() {
            return Err(SealError::validation(format!("path is not absolute: {}", path.display())));
        }
        if std::fs::symlink_metadata(path).is_err() {
            return Err(SealError::validation(format!(
                "source path does not exist: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Output directory (that of the first input) and artifact stem: the single
/// input's name, or a timestamped bundle name.
fn output_parts(paths: &[PathBuf]) -> SealResult<(PathBuf, String)> {
    let first = &paths[0];
    let dir = first
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| SealError::validation(format!("no parent directory: {}", first.display())))?;

    let stem = if paths.len() == 1 {
        first
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SealError::validation(format!("no file name: {}", first.display())))?
    } else {
        bundle_stem(chrono::Local::now())
    };
    Ok((dir, stem))
}

fn bundle_stem<Tz: chrono::TimeZone>(now: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("encrypted_bundle_{}", now.format("%Y%m%d_%H%M%S"))
}
