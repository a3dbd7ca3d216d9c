//! Metadata sanitization through the external `mat2` tool.
//!
//! Exit code 0 means the file was cleaned, 1 means the format is not
//! supported and the file was left as-is. Both are usable results.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use sealbox_core::config::SealConfig;
use sealbox_core::process::{exit_label, run_tool, tool_name};
use sealbox_core::{SealError, SealResult};
use sealbox_secrets::SecureTempResource;

#[derive(Debug, Clone)]
pub struct MetadataScrubber {
    tool: PathBuf,
    timeout: Duration,
    temp_root: PathBuf,
}

impl MetadataScrubber {
    pub fn new(config: &SealConfig) -> Self {
        Self {
            tool: config.tools.mat2.clone(),
            timeout: config.timeouts.scrub(),
            temp_root: config.workspace.temp_root(),
        }
    }

    /// Produce a sanitized copy of `original`, which is never modified.
    ///
    /// The copy keeps the original extension so the sanitizer can detect the
    /// format. The caller owns the returned resource; dropping it erases it.
    pub async fn scrub(&self, original: &Path) -> SealResult<SecureTempResource> {
        let meta = tokio::fs::metadata(original).await?;
        if !meta.is_file() {
            return Err(SealError::validation(format!(
                "not a regular file: {}",
                original.display()
            )));
        }

        let suffix = original
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let copy = SecureTempResource::create(&self.temp_root, "sealbox_clean_", &suffix, "scrubber")?;

        // Stream into the existing 0600 file; fs::copy would carry over the source mode
        let mut src = tokio::fs::File::open(original).await?;
        let mut dst = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(copy.path())
            .await?;
        tokio::io::copy(&mut src, &mut dst).await?;
        dst.sync_all().await?;
        drop(dst);

        // On error the copy is dropped here, which erases it
        self.scrub_in_place(copy.path()).await?;
        tracing::info!(path = %original.display(), "metadata cleaned into temporary copy");
        Ok(copy)
    }

    /// Sanitize `path` itself. Only used on staged copies, never on originals.
    pub async fn scrub_in_place(&self, path: &Path) -> SealResult<()> {
        let out = run_tool(
            &self.tool,
            [
                OsStr::new("--inplace"),
                OsStr::new("--unknown-members"),
                OsStr::new("omit"),
                path.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        match out.code() {
            Some(0) | Some(1) => Ok(()),
            _ => {
                let code = exit_label(&out.status);
                tracing::warn!(
                    path = %path.display(),
                    code = %code,
                    stderr = %out.stderr_lossy().trim(),
                    "metadata sanitizer failed"
                );
                Err(SealError::Subprocess {
                    tool: tool_name(&self.tool),
                    code,
                })
            }
        }
    }

    /// Sanitize every regular file under `root`, returning how many succeeded.
    /// Individual failures are logged and skipped.
    pub async fn scrub_tree(&self, root: &Path) -> usize {
        let files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_file() => Some(e.into_path()),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("skipping unreadable staging entry: {e}");
                    None
                }
            })
            .collect();

        let mut cleaned = 0;
        for file in &files {
            match self.scrub_in_place(file).await {
                Ok(()) => cleaned += 1,
                Err(e) => tracing::warn!(path = %file.display(), "scrub skipped: {e}"),
            }
        }
        tracing::debug!(total = files.len(), cleaned, "staging tree scrubbed");
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_mat2(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-mat2");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn scrubber(dir: &Path, body: &str) -> (MetadataScrubber, PathBuf) {
        let scratch = dir.join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let mut config = SealConfig::default();
        config.tools.mat2 = fake_mat2(dir, body);
        config.workspace.temp_dir = Some(scratch.clone());
        config.timeouts.scrub_secs = 2;
        (MetadataScrubber::new(&config), scratch)
    }

    // last argument is the file; append a marker so the edit is observable
    const APPEND_MARKER: &str = r#"for f; do :; done; printf 'CLEANED' >> "$f""#;

    #[tokio::test]
    async fn test_scrub_leaves_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (scrubber, scratch) = scrubber(dir.path(), APPEND_MARKER);
        let original = dir.path().join("photo.jpg");
        std::fs::write(&original, b"jpegdata").unwrap();

        let copy = scrubber.scrub(&original).await.unwrap();
        assert!(copy.path().starts_with(&scratch));
        assert_eq!(copy.path().extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(copy.path()).unwrap(), b"jpegdataCLEANED");
        assert_eq!(std::fs::read(&original).unwrap(), b"jpegdata");

        drop(copy);
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_format_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let (scrubber, _) = scrubber(dir.path(), "exit 1");
        let original = dir.path().join("data.xyz");
        std::fs::write(&original, b"raw").unwrap();

        let copy = scrubber.scrub(&original).await.unwrap();
        assert_eq!(std::fs::read(copy.path()).unwrap(), b"raw");
    }

    #[tokio::test]
    async fn test_failure_removes_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (scrubber, scratch) = scrubber(dir.path(), "exit 2");
        let original = dir.path().join("doc.pdf");
        std::fs::write(&original, b"%PDF").unwrap();

        let err = scrubber.scrub(&original).await.unwrap_err();
        assert!(matches!(err, SealError::Subprocess { .. }));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (scrubber, scratch) = scrubber(dir.path(), "sleep 30");
        let original = dir.path().join("doc.pdf");
        std::fs::write(&original, b"%PDF").unwrap();

        let err = scrubber.scrub(&original).await.unwrap_err();
        assert!(matches!(err, SealError::Timeout { .. }));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SealConfig::default();
        config.tools.mat2 = PathBuf::from("/nonexistent/mat2");
        config.workspace.temp_dir = Some(dir.path().to_path_buf());
        let original = dir.path().join("a.txt");
        std::fs::write(&original, b"a").unwrap();

        let err = MetadataScrubber::new(&config).scrub(&original).await.unwrap_err();
        assert!(matches!(err, SealError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn test_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (scrubber, _) = scrubber(dir.path(), "exit 0");
        assert!(matches!(
            scrubber.scrub(dir.path()).await,
            Err(SealError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_scrub_tree_counts_successes() {
        let dir = tempfile::tempdir().unwrap();
        // fail on files named *.bad
        let (scrubber, _) = scrubber(
            dir.path(),
            r#"for f; do :; done; case "$f" in *.bad) exit 3 ;; esac; exit 0"#,
        );
        let root = dir.path().join("staging");
        std::fs::create_dir_all(root.join("nested/deeper")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("nested/b.jpg"), b"b").unwrap();
        std::fs::write(root.join("nested/deeper/c.bad"), b"c").unwrap();

        assert_eq!(scrubber.scrub_tree(&root).await, 2);
    }
}
