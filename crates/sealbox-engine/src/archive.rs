//! Staging, bundling and guarded extraction via the system archiver.
//!
//! Bundles are gzip-compressed tar streams of a staging directory's
//! contents (`tar -czf <archive> -C <staging> .`). Extraction lists the
//! complete member table first and refuses the whole archive if any entry
//! is absolute or climbs out with `..`; nothing is written until every
//! member has passed.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use sealbox_core::config::SealConfig;
use sealbox_core::process::{run_tool, tool_name};
use sealbox_core::types::GZIP_MAGIC;
use sealbox_core::{SealError, SealResult};

#[derive(Debug, Clone)]
pub struct ArchiveBundler {
    tar: PathBuf,
    cp: PathBuf,
    timeout: Duration,
}

impl ArchiveBundler {
    pub fn new(config: &SealConfig) -> Self {
        Self {
            tar: config.tools.tar.clone(),
            cp: config.tools.cp.clone(),
            timeout: config.timeouts.archive(),
        }
    }

    /// Copy every input (file or directory, attributes preserved) into
    /// `staging` under its own base name.
    pub async fn stage(&self, inputs: &[PathBuf], staging: &Path) -> SealResult<()> {
        let mut seen = HashSet::new();
        for input in inputs {
            let name = input.file_name().ok_or_else(|| {
                SealError::validation(format!("path has no file name: {}", input.display()))
            })?;
            if !seen.insert(name.to_os_string()) {
                return Err(SealError::validation(format!(
                    "two inputs share the name {}",
                    name.to_string_lossy()
                )));
            }

            let dest = staging.join(name);
            let args: [&OsStr; 4] = [
                OsStr::new("-a"),
                OsStr::new("--"),
                input.as_os_str(),
                dest.as_os_str(),
            ];
            run_tool(&self.cp, args, self.timeout)
                .await?
                .ensure_success(&tool_name(&self.cp))?;
            tracing::debug!(src = %input.display(), "staged");
        }
        Ok(())
    }

    /// Archive the contents of `staging` (not the directory itself) into
    /// `archive`, which must live outside `staging`.
    pub async fn bundle(&self, staging: &Path, archive: &Path) -> SealResult<()> {
        if archive.starts_with(staging) {
            return Err(SealError::validation("archive path must be outside the staging directory"));
        }

        let args: [&OsStr; 5] = [
            OsStr::new("-czf"),
            archive.as_os_str(),
            OsStr::new("-C"),
            staging.as_os_str(),
            OsStr::new("."),
        ];
        run_tool(&self.tar, args, self.timeout)
            .await?
            .ensure_success(&tool_name(&self.tar))?;
        tracing::debug!(archive = %archive.display(), "bundle written");
        Ok(())
    }

    /// Member names as printed by the archiver, one per line.
    pub async fn list_members(&self, archive: &Path) -> SealResult<Vec<String>> {
        let args: [OsString; 2] = ["-tzf".into(), archive.as_os_str().to_owned()];
        let out = run_tool(&self.tar, args, self.timeout)
            .await?
            .ensure_success(&tool_name(&self.tar))?;
        Ok(out
            .stdout_lossy()
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Validate the full member list, then unpack into `dest`.
    pub async fn extract(&self, archive: &Path, dest: &Path) -> SealResult<()> {
        let members = self.list_members(archive).await?;
        validate_members(&members)?;

        let args: [&OsStr; 4] = [
            OsStr::new("-xzf"),
            archive.as_os_str(),
            OsStr::new("-C"),
            dest.as_os_str(),
        ];
        run_tool(&self.tar, args, self.timeout)
            .await?
            .ensure_success(&tool_name(&self.tar))?;
        tracing::info!(dest = %dest.display(), members = members.len(), "archive extracted");
        Ok(())
    }
}

/// True for absolute member names and names with a `..` component.
pub fn is_unsafe_member(name: &str) -> bool {
    name.starts_with('/')
        || Path::new(name)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

pub fn validate_members<S: AsRef<str>>(members: &[S]) -> SealResult<()> {
    if let Some(bad) = members.iter().map(AsRef::as_ref).find(|m| is_unsafe_member(m)) {
        tracing::warn!(member = bad, "archive rejected: unsafe member path");
        return Err(SealError::validation(format!("suspicious path in archive: {bad}")));
    }
    Ok(())
}

/// gzip detection by magic bytes, independent of the file name.
pub fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
