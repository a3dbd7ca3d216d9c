use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Marker the encryption tool writes near the start of every artifact
pub const AGE_MAGIC: &[u8] = b"age-encryption.org/v1";

/// How far into a file the marker is searched for
pub const AGE_HEADER_SCAN: usize = 100;

/// Suffix of published encrypted artifacts
pub const ENCRYPTED_SUFFIX: &str = ".age";

/// Appended when a decrypted file had no recognised suffix to strip
pub const DECRYPTED_SUFFIX: &str = ".decrypted";

/// Two-byte prefix of a gzip stream
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Direction the encryption tool is driven in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandMode {
    /// Prompts twice (entry + confirmation)
    Encrypt,
    /// Prompts once
    Decrypt,
}

impl CommandMode {
    /// How many times the tool asks for the passphrase
    pub fn prompt_count(self) -> usize {
        match self {
            CommandMode::Encrypt => 2,
            CommandMode::Decrypt => 1,
        }
    }

    /// Mode flag passed to the encryption tool
    pub fn flag(self) -> &'static str {
        match self {
            CommandMode::Encrypt => "-p",
            CommandMode::Decrypt => "-d",
        }
    }
}

/// Where a generated passphrase came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassphraseSource {
    /// Word corpus + OS CSPRNG
    Wordlist,
    /// Hardware token TRNG
    Hardware,
}

/// User decision after a generated passphrase has been revealed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptChoice {
    KeepOriginals,
    DeleteOriginals,
    Cancel,
}

/// Outcome of one encryption job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptReport {
    /// Number of input paths bundled
    pub items: usize,
    /// Published artifact
    pub destination: PathBuf,
    /// Files successfully sanitized, `None` when scrubbing did not run
    pub scrubbed: Option<usize>,
    pub originals_deleted: bool,
}

impl EncryptReport {
    /// One-line summary for the notification channel
    pub fn summary(&self) -> String {
        let name = self
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut msg = format!("{} item(s) → {}", self.items, name);
        if let Some(count) = self.scrubbed.filter(|c| *c > 0) {
            msg.push_str(&format!(" ({count} cleaned)"));
        }
        if self.originals_deleted {
            msg.push_str(" (originals deleted)");
        }
        msg
    }
}

/// Aggregated outcome of a decryption run over several files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecryptReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Final paths produced (renamed files or extraction directories)
    pub outputs: Vec<PathBuf>,
    /// Per-file failure details, already truncated for display
    pub errors: Vec<String>,
}

impl DecryptReport {
    pub fn record_success(&mut self, output: PathBuf) {
        self.succeeded += 1;
        self.outputs.push(output);
    }

    pub fn record_failure(&mut self, detail: impl Into<String>) {
        self.failed += 1;
        self.errors.push(detail.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_counts() {
        assert_eq!(CommandMode::Encrypt.prompt_count(), 2);
        assert_eq!(CommandMode::Decrypt.prompt_count(), 1);
    }

    #[test]
    fn test_encrypt_summary() {
        let report = EncryptReport {
            items: 2,
            destination: PathBuf::from("/home/u/encrypted_bundle_20260101_120000.age"),
            scrubbed: Some(3),
            originals_deleted: true,
        };
        assert_eq!(
            report.summary(),
            "2 item(s) → encrypted_bundle_20260101_120000.age (3 cleaned) (originals deleted)"
        );
    }

    #[test]
    fn test_encrypt_summary_without_scrub() {
        let report = EncryptReport {
            items: 1,
            destination: PathBuf::from("/home/u/doc.txt.age"),
            scrubbed: Some(0),
            originals_deleted: false,
        };
        assert_eq!(report.summary(), "1 item(s) → doc.txt.age");
    }

    #[test]
    fn test_decrypt_report_counts() {
        let mut report = DecryptReport::default();
        report.record_success(PathBuf::from("/home/u/doc.txt"));
        report.record_failure("b.age: wrong passphrase");
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.errors, vec!["b.age: wrong passphrase".to_string()]);
    }
}
