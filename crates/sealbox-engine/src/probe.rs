//! Cached availability checks for the optional and required tools.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::OnceCell;

use sealbox_core::config::SealConfig;
use sealbox_core::process::probe;

/// Probes run at most once per instance; the answer is kept for its lifetime.
#[derive(Debug)]
pub struct ToolProbes {
    age: PathBuf,
    mat2: PathBuf,
    timeout: Duration,
    age_available: OnceCell<bool>,
    mat2_available: OnceCell<bool>,
}

impl ToolProbes {
    pub fn new(config: &SealConfig) -> Self {
        Self {
            age: config.tools.age.clone(),
            mat2: config.tools.mat2.clone(),
            timeout: config.timeouts.probe(),
            age_available: OnceCell::new(),
            mat2_available: OnceCell::new(),
        }
    }

    pub async fn age_available(&self) -> bool {
        *self
            .age_available
            .get_or_init(|| probe(&self.age, self.timeout))
            .await
    }

    pub async fn mat2_available(&self) -> bool {
        let available = *self
            .mat2_available
            .get_or_init(|| probe(&self.mat2, self.timeout))
            .await;
        if !available {
            tracing::debug!("metadata sanitizer not available, scrubbing skipped");
        }
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tools_probe_false() {
        let mut config = SealConfig::default();
        config.tools.age = PathBuf::from("/nonexistent/age");
        config.tools.mat2 = PathBuf::from("/nonexistent/mat2");
        let probes = ToolProbes::new(&config);
        assert!(!probes.age_available().await);
        assert!(!probes.mat2_available().await);
    }

    #[tokio::test]
    async fn test_result_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let mut config = SealConfig::default();
        config.tools.age = tool.clone();
        let probes = ToolProbes::new(&config);

        assert!(probes.age_available().await);
        std::fs::remove_file(&tool).unwrap();
        assert!(probes.age_available().await);
    }
}
