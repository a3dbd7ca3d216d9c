use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    pub tools: ToolsConfig,
    pub timeouts: TimeoutsConfig,
    pub inject: InjectConfig,
    pub rate_limit: RateLimitConfig,
    pub passphrase: PassphraseConfig,
    pub hsm: HsmConfig,
    pub workspace: WorkspaceConfig,
    pub log: LogConfig,
}

/// External programs the engine drives. Bare names are resolved through PATH.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Encryption tool (passphrase mode, reads the secret from a terminal)
    pub age: PathBuf,
    /// Archiver used for bundling and extraction
    pub tar: PathBuf,
    /// Attribute-preserving copy into the staging directory
    pub cp: PathBuf,
    /// Metadata sanitizer (optional, scrubbing is skipped when missing)
    pub mat2: PathBuf,
    /// PKCS#11 slot listing / random generation tool
    pub pkcs11_tool: PathBuf,
    /// Clipboard writer used by the passphrase reveal surface
    pub clipboard: PathBuf,
}

/// Bounded waits for each class of subprocess, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// `--version` style availability probes
    pub probe_secs: u64,
    /// Token slot listing
    pub token_probe_secs: u64,
    /// Hardware random generation
    pub hsm_secs: u64,
    /// One metadata sanitizer run
    pub scrub_secs: u64,
    /// One encryption/decryption run over the pseudo-terminal
    pub inject_secs: u64,
    /// Copy, archive, list and extract steps
    pub archive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectConfig {
    /// Delay before each passphrase write, lets the tool reach its prompt
    pub settle_ms: u64,
}

/// Failed-decryption throttling (in-memory, per process)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: usize,
    pub lockout_secs: u64,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassphraseConfig {
    /// Number of corpus words in a generated passphrase
    pub words: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HsmConfig {
    /// Random bytes requested from the token (256 = 2048 bits)
    pub random_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root for staging directories and intermediate archives (default: system temp)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl TimeoutsConfig {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn token_probe(&self) -> Duration {
        Duration::from_secs(self.token_probe_secs)
    }

    pub fn hsm(&self) -> Duration {
        Duration::from_secs(self.hsm_secs)
    }

    pub fn scrub(&self) -> Duration {
        Duration::from_secs(self.scrub_secs)
    }

    pub fn inject(&self) -> Duration {
        Duration::from_secs(self.inject_secs)
    }

    pub fn archive(&self) -> Duration {
        Duration::from_secs(self.archive_secs)
    }
}

impl WorkspaceConfig {
    /// Directory under which per-job temporaries are created.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            age: PathBuf::from("age"),
            tar: PathBuf::from("tar"),
            cp: PathBuf::from("cp"),
            mat2: PathBuf::from("mat2"),
            pkcs11_tool: PathBuf::from("pkcs11-tool"),
            clipboard: PathBuf::from("wl-copy"),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            probe_secs: 2,
            token_probe_secs: 5,
            hsm_secs: 30,
            scrub_secs: 60,
            inject_secs: 120,
            archive_secs: 600,
        }
    }
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self { settle_ms: 100 }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lockout_secs: 30,
            window_secs: 300,
        }
    }
}

impl Default for PassphraseConfig {
    fn default() -> Self {
        Self { words: 24 }
    }
}

impl Default for HsmConfig {
    fn default() -> Self {
        Self { random_bytes: 256 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_file_overrides_every_section() {
        let toml_str = r#"
[tools]
age = "/usr/local/bin/age"
mat2 = "/opt/mat2/bin/mat2"

[timeouts]
inject_secs = 30
scrub_secs = 10

[inject]
settle_ms = 250

[rate_limit]
max_attempts = 5
lockout_secs = 60
window_secs = 600

[passphrase]
words = 12

[hsm]
random_bytes = 64

[workspace]
temp_dir = "/var/tmp/sealbox"

[log]
level = "debug"
format = "json"
"#;
        let config: SealConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.tools.age, PathBuf::from("/usr/local/bin/age"));
        assert_eq!(config.tools.mat2, PathBuf::from("/opt/mat2/bin/mat2"));
        assert_eq!(config.tools.tar, PathBuf::from("tar"));
        assert_eq!(config.timeouts.inject(), Duration::from_secs(30));
        assert_eq!(config.timeouts.scrub(), Duration::from_secs(10));
        assert_eq!(config.inject.settle_ms, 250);
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.rate_limit.window_secs, 600);
        assert_eq!(config.passphrase.words, 12);
        assert_eq!(config.hsm.random_bytes, 64);
        assert_eq!(
            config.workspace.temp_root(),
            PathBuf::from("/var/tmp/sealbox")
        );
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: SealConfig = toml::from_str("").unwrap();

        assert_eq!(config.tools.age, PathBuf::from("age"));
        assert_eq!(config.tools.pkcs11_tool, PathBuf::from("pkcs11-tool"));
        assert_eq!(config.timeouts.probe(), Duration::from_secs(2));
        assert_eq!(config.timeouts.token_probe(), Duration::from_secs(5));
        assert_eq!(config.timeouts.hsm(), Duration::from_secs(30));
        assert_eq!(config.timeouts.inject(), Duration::from_secs(120));
        assert_eq!(config.inject.settle_ms, 100);
        assert_eq!(config.rate_limit.max_attempts, 3);
        assert_eq!(config.rate_limit.lockout_secs, 30);
        assert_eq!(config.rate_limit.window_secs, 300);
        assert_eq!(config.passphrase.words, 24);
        assert_eq!(config.hsm.random_bytes, 256);
        assert!(config.workspace.temp_dir.is_none());
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let toml_str = r#"
[rate_limit]
lockout_secs = 90
"#;
        let config: SealConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.rate_limit.lockout_secs, 90);
        // Defaults
        assert_eq!(config.rate_limit.max_attempts, 3);
        assert_eq!(config.rate_limit.window_secs, 300);
        assert_eq!(config.inject.settle_ms, 100);
    }

    #[test]
    fn test_defaults_survive_toml_rendering() {
        let config = SealConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SealConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.tools.age, parsed.tools.age);
        assert_eq!(config.timeouts.archive_secs, parsed.timeouts.archive_secs);
        assert_eq!(config.rate_limit.window_secs, parsed.rate_limit.window_secs);
    }
}
