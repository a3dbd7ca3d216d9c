//! PKCS#11 hardware random passphrases.
//!
//! Lifecycle of one extraction:
//!
//! ```text
//! ModuleDiscovery ─▶ TokenPresence ─▶ Authenticated ─▶ RandomExtracted ─▶ Erased
//! ```
//!
//! Only driver libraries on the compiled-in allow-list are ever handed to the
//! token tool. Random bytes pass through a [`SecureTempResource`] that is
//! zeroed and shredded on every exit path. Callers only ever see the generic
//! `SealError::Hardware`; the specific [`HsmFailure`] is logged locally.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use zeroize::Zeroizing;

use sealbox_core::config::SealConfig;
use sealbox_core::process::run_tool;
use sealbox_core::{SealError, SealResult};

use crate::passphrase::Passphrase;
use crate::secure_temp::SecureTempResource;

/// SafeNet eToken driver locations. Nothing outside this list is ever loaded.
pub const PKCS11_MODULE_PATHS: &[&str] = &[
    "/usr/lib/libeToken.so",
    "/usr/lib64/libeToken.so",
    "/opt/eToken/lib/libeToken.so",
    "/usr/lib/x86_64-linux-gnu/libeToken.so",
    "/usr/lib/i386-linux-gnu/libeToken.so",
];

pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 16;

/// Specific hardware failure causes. Local diagnostics only.
#[derive(Debug, Error)]
pub enum HsmFailure {
    #[error("no allow-listed PKCS#11 module found")]
    ModuleNotFound,
    #[error("token not present")]
    TokenAbsent,
    #[error("invalid PIN: {0}")]
    InvalidPin(&'static str),
    #[error("token login or random generation rejected (exit {0})")]
    AuthFailure(String),
    #[error("token operation timed out")]
    Timeout,
    #[error("random output length mismatch: expected {expected}, got {actual}")]
    RandomLengthMismatch { expected: usize, actual: usize },
    #[error("token tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HsmFailure> for SealError {
    fn from(failure: HsmFailure) -> Self {
        match failure {
            HsmFailure::InvalidPin(reason) => SealError::Validation(reason.to_string()),
            _ => SealError::Hardware,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsmState {
    ModuleDiscovery,
    TokenPresence,
    Authenticated,
    RandomExtracted,
    Erased,
}

/// An allow-listed PKCS#11 driver library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    path: PathBuf,
}

impl ModuleDescriptor {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Token PIN, validated and zeroized on drop.
pub struct Pin(SecretString);

impl Pin {
    /// 4–16 printable ASCII characters.
    pub fn validate(pin: SecretString) -> SealResult<Self> {
        let raw = pin.expose_secret();
        if raw.is_empty() {
            return Err(HsmFailure::InvalidPin("PIN cannot be empty").into());
        }
        if raw.len() < MIN_PIN_LEN {
            return Err(HsmFailure::InvalidPin("PIN too short (minimum 4 characters)").into());
        }
        if raw.len() > MAX_PIN_LEN {
            return Err(HsmFailure::InvalidPin("PIN too long (maximum 16 characters)").into());
        }
        if !raw.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            return Err(HsmFailure::InvalidPin("PIN contains invalid characters").into());
        }
        Ok(Pin(pin))
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin([REDACTED])")
    }
}

/// Drives the token tool to discover a token and pull TRNG output.
#[derive(Debug)]
pub struct HsmRandomProvider {
    tool: PathBuf,
    allow_list: Vec<PathBuf>,
    probe_timeout: Duration,
    generate_timeout: Duration,
    random_bytes: usize,
    temp_root: PathBuf,
    state: HsmState,
}

impl HsmRandomProvider {
    pub fn new(config: &SealConfig) -> Self {
        Self {
            tool: config.tools.pkcs11_tool.clone(),
            allow_list: PKCS11_MODULE_PATHS.iter().map(PathBuf::from).collect(),
            probe_timeout: config.timeouts.token_probe(),
            generate_timeout: config.timeouts.hsm(),
            random_bytes: config.hsm.random_bytes,
            temp_root: config.workspace.temp_root(),
            state: HsmState::ModuleDiscovery,
        }
    }

    /// Substitute driver list; only built for tests (`test-support`).
    #[cfg(any(test, feature = "test-support"))]
    pub fn with_allow_list(config: &SealConfig, allow_list: Vec<PathBuf>) -> Self {
        Self {
            allow_list,
            ..Self::new(config)
        }
    }

    pub fn state(&self) -> HsmState {
        self.state
    }

    /// First allow-listed driver present on disk.
    pub fn find_module(&mut self) -> Option<ModuleDescriptor> {
        self.state = HsmState::ModuleDiscovery;
        let found = self
            .allow_list
            .iter()
            .find(|p| p.exists())
            .map(|p| ModuleDescriptor { path: p.clone() });
        match &found {
            Some(m) => tracing::debug!(module = %m.path.display(), "PKCS#11 module found"),
            None => tracing::debug!("{}", HsmFailure::ModuleNotFound),
        }
        found
    }

    fn is_allowed(&self, module: &ModuleDescriptor) -> bool {
        self.allow_list.iter().any(|p| *p == module.path)
    }

    /// Whether a token sits in any slot. Tool failures and timeouts count as absent.
    pub async fn is_token_present(&mut self, module: &ModuleDescriptor) -> bool {
        if !self.is_allowed(module) {
            tracing::warn!("PKCS#11 module path outside allow-list rejected");
            return false;
        }
        self.state = HsmState::TokenPresence;

        let args: [OsString; 3] = [
            "--module".into(),
            module.path.clone().into_os_string(),
            "--list-slots".into(),
        ];
        match run_tool(&self.tool, args, self.probe_timeout).await {
            Ok(out) => {
                let listing = out.stdout_lossy().to_lowercase();
                listing.contains("token present") || (out.success() && listing.contains("slot"))
            }
            Err(e) => {
                tracing::debug!("{}: {e}", HsmFailure::TokenAbsent);
                false
            }
        }
    }

    /// Log in and pull `random_bytes` of TRNG output, encoded URL-safe base64
    /// without padding.
    pub async fn extract_random(&mut self, module: &ModuleDescriptor, pin: &Pin) -> SealResult<Passphrase> {
        match self.extract_inner(module, pin).await {
            Ok(passphrase) => Ok(passphrase),
            Err(failure) => {
                tracing::warn!(cause = %failure, "hardware random extraction failed");
                Err(match failure {
                    HsmFailure::InvalidPin(_) => failure.into(),
                    _ => SealError::Hardware,
                })
            }
        }
    }

    async fn extract_inner(&mut self, module: &ModuleDescriptor, pin: &Pin) -> Result<Passphrase, HsmFailure> {
        if !self.is_allowed(module) {
            tracing::warn!("PKCS#11 module path outside allow-list rejected");
            return Err(HsmFailure::ModuleNotFound);
        }

        let mut resource = SecureTempResource::create(&self.temp_root, "hsm_random_", ".bin", "hsm")
            .map_err(|e| match e {
                SealError::Io(io) => HsmFailure::Io(io),
                other => HsmFailure::Io(std::io::Error::other(other.to_string())),
            })?;
        resource.set_sensitive_len(self.random_bytes);

        let result = self.generate_into(module, pin, resource.path()).await;

        let outcome = resource.erase();
        self.state = HsmState::Erased;
        tracing::debug!(?outcome, "hardware random temp file erased");

        result
    }

    async fn generate_into(&mut self, module: &ModuleDescriptor, pin: &Pin, out_file: &Path) -> Result<Passphrase, HsmFailure> {
        // pkcs11-tool cannot read the PIN from a pseudo-terminal, so it goes on argv
        let args: Vec<OsString> = vec![
            "--module".into(),
            module.path.clone().into_os_string(),
            "--login".into(),
            "--pin".into(),
            pin.expose().into(),
            "--generate-random".into(),
            self.random_bytes.to_string().into(),
            "--output-file".into(),
            out_file.as_os_str().to_owned(),
        ];

        let output = match run_tool(&self.tool, args, self.generate_timeout).await {
            Ok(out) => out,
            Err(SealError::Timeout { .. }) => return Err(HsmFailure::Timeout),
            Err(SealError::ToolUnavailable(tool)) => return Err(HsmFailure::ToolUnavailable(tool)),
            Err(SealError::Io(e)) => return Err(HsmFailure::Io(e)),
            Err(other) => return Err(HsmFailure::Io(std::io::Error::other(other.to_string()))),
        };
        if !output.success() {
            return Err(HsmFailure::AuthFailure(sealbox_core::process::exit_label(&output.status)));
        }
        self.state = HsmState::Authenticated;

        let bytes = Zeroizing::new(tokio::fs::read(out_file).await?);
        if bytes.len() != self.random_bytes {
            return Err(HsmFailure::RandomLengthMismatch {
                expected: self.random_bytes,
                actual: bytes.len(),
            });
        }
        self.state = HsmState::RandomExtracted;

        let encoded = URL_SAFE_NO_PAD.encode(bytes.as_slice());
        Ok(Passphrase::new(SecretString::from(encoded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-pkcs11-tool");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    /// Writes `$1` bytes of urandom to the path after `--output-file`.
    const GENERATE_SCRIPT: &str = r#"
count=""; out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --generate-random) count="$2"; shift 2 ;;
    --output-file) out="$2"; shift 2 ;;
    --list-slots) echo "Slot 0 (0x0): eToken"; echo "  token present"; exit 0 ;;
    *) shift ;;
  esac
done
head -c "$count" /dev/urandom > "$out"
"#;

    fn setup(body: &str) -> (tempfile::TempDir, SealConfig, ModuleDescriptor, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let module = dir.path().join("libeToken.so");
        std::fs::write(&module, b"").unwrap();

        let mut config = SealConfig::default();
        config.tools.pkcs11_tool = fake_tool(dir.path(), body);
        config.workspace.temp_dir = Some(scratch.clone());
        config.timeouts.hsm_secs = 5;

        let descriptor = ModuleDescriptor { path: module };
        (dir, config, descriptor, scratch)
    }

    fn pin() -> Pin {
        Pin::validate(SecretString::from("1234")).unwrap()
    }

    #[test]
    fn test_pin_validation() {
        assert!(Pin::validate(SecretString::from("")).is_err());
        assert!(Pin::validate(SecretString::from("123")).is_err());
        assert!(Pin::validate(SecretString::from("1".repeat(17))).is_err());
        assert!(Pin::validate(SecretString::from("12\n34")).is_err());
        assert!(Pin::validate(SecretString::from("1234")).is_ok());
        assert!(Pin::validate(SecretString::from("p@ss w0rd~")).is_ok());
        assert!(Pin::validate(SecretString::from("x".repeat(16))).is_ok());
    }

    #[test]
    fn test_invalid_pin_is_validation_error() {
        let err = Pin::validate(SecretString::from("12")).unwrap_err();
        assert!(matches!(err, SealError::Validation(_)));
    }

    #[test]
    fn test_find_module_none_when_absent() {
        let config = SealConfig::default();
        let mut provider =
            HsmRandomProvider::with_allow_list(&config, vec![PathBuf::from("/nonexistent/libeToken.so")]);
        assert!(provider.find_module().is_none());
    }

    #[tokio::test]
    async fn test_extract_random_success_erases_temp() {
        let (_dir, config, module, scratch) = setup(GENERATE_SCRIPT);
        let mut provider = HsmRandomProvider::with_allow_list(&config, vec![module.path.clone()]);

        assert_eq!(provider.find_module(), Some(module.clone()));
        assert!(provider.is_token_present(&module).await);

        let passphrase = provider.extract_random(&module, &pin()).await.unwrap();
        // 256 bytes → ceil(256 * 4 / 3) characters, unpadded
        assert_eq!(passphrase.len(), 342);
        assert!(passphrase
            .expose_secret()
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        assert_eq!(provider.state(), HsmState::Erased);
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_length_mismatch_is_generic_and_erased() {
        let (_dir, config, module, scratch) =
            setup(&GENERATE_SCRIPT.replace("head -c \"$count\"", "head -c 10"));
        let mut provider = HsmRandomProvider::with_allow_list(&config, vec![module.path.clone()]);

        let err = provider.extract_random(&module, &pin()).await.unwrap_err();
        assert!(matches!(err, SealError::Hardware));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_login_failure_is_generic() {
        let (_dir, config, module, scratch) = setup("echo 'CKR_PIN_INCORRECT' >&2; exit 1");
        let mut provider = HsmRandomProvider::with_allow_list(&config, vec![module.path.clone()]);

        let err = provider.extract_random(&module, &pin()).await.unwrap_err();
        assert!(matches!(err, SealError::Hardware));
        assert!(!err.to_string().contains("CKR_PIN_INCORRECT"));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_generic() {
        let (_dir, mut config, module, scratch) = setup("sleep 30");
        config.timeouts.hsm_secs = 1;
        let mut provider = HsmRandomProvider::with_allow_list(&config, vec![module.path.clone()]);

        let err = provider.extract_random(&module, &pin()).await.unwrap_err();
        assert!(matches!(err, SealError::Hardware));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_module_outside_allow_list_rejected() {
        let (dir, config, module, _scratch) = setup(GENERATE_SCRIPT);
        let mut provider = HsmRandomProvider::with_allow_list(&config, vec![module.path.clone()]);

        let rogue = ModuleDescriptor {
            path: dir.path().join("evil.so"),
        };
        assert!(!provider.is_token_present(&rogue).await);
        assert!(matches!(
            provider.extract_random(&rogue, &pin()).await,
            Err(SealError::Hardware)
        ));
    }

    #[tokio::test]
    async fn test_token_absent_when_tool_fails() {
        let (_dir, config, module, _scratch) = setup("exit 1");
        let mut provider = HsmRandomProvider::with_allow_list(&config, vec![module.path.clone()]);
        assert!(!provider.is_token_present(&module).await);
    }
}
