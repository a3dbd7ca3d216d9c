//! Safety check run before any deletion or extraction destination write.

use std::path::{Component, Path, PathBuf};

/// System prefixes no workflow may delete from or extract into.
pub const PROTECTED_PREFIXES: &[&str] = &["/bin", "/sbin", "/usr", "/etc", "/var", "/boot", "/root"];

#[derive(Debug, Clone)]
pub struct PathValidator {
    protected: Vec<PathBuf>,
}

impl Default for PathValidator {
    fn default() -> Self {
        Self {
            protected: PROTECTED_PREFIXES.iter().map(PathBuf::from).collect(),
        }
    }
}

impl PathValidator {
    /// The path must be absolute, resolve (symlinks followed) without
    /// traversal segments, and not land on or under a protected prefix.
    pub fn is_safe(&self, path: &Path) -> bool {
        if !path.is_absolute() {
            tracing::warn!(path = %path.display(), "path rejected: not absolute");
            return false;
        }

        let resolved = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %path.display(), "path rejected: cannot resolve: {e}");
                return false;
            }
        };

        if resolved.components().any(|c| matches!(c, Component::ParentDir)) {
            tracing::warn!(path = %path.display(), "path rejected: traversal segment after resolution");
            return false;
        }

        // Path::starts_with matches whole components, so /usrlocal is not /usr
        if let Some(prefix) = self.protected.iter().find(|p| resolved.starts_with(p)) {
            tracing::warn!(
                path = %resolved.display(),
                prefix = %prefix.display(),
                "path rejected: system directory"
            );
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_rejected() {
        assert!(!PathValidator::default().is_safe(Path::new("some/relative/dir")));
    }

    #[test]
    fn test_system_dirs_rejected() {
        let v = PathValidator::default();
        assert!(!v.is_safe(Path::new("/etc")));
        assert!(!v.is_safe(Path::new("/usr/bin")));
        assert!(!v.is_safe(Path::new("/bin")));
    }

    #[test]
    fn test_missing_path_rejected() {
        assert!(!PathValidator::default().is_safe(Path::new("/nonexistent/sealbox/dir")));
    }

    #[test]
    fn test_scratch_dir_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("folder");
        std::fs::create_dir(&sub).unwrap();
        assert!(PathValidator::default().is_safe(&sub));
    }

    #[test]
    fn test_dotdot_resolves_before_check() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("a");
        std::fs::create_dir(&sub).unwrap();
        // a/.. resolves back into the scratch dir
        assert!(PathValidator::default().is_safe(&sub.join("..")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_into_system_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("innocent");
        std::os::unix::fs::symlink("/etc", &link).unwrap();
        assert!(!PathValidator::default().is_safe(&link));
    }

    #[test]
    fn test_custom_protected_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator {
            protected: vec![dir.path().canonicalize().unwrap()],
        };
        assert!(!validator.is_safe(dir.path()));
    }
}
