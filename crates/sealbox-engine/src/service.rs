//! Host-facing entry points.
//!
//! One [`SealService`] lives for the whole process. It owns the state that
//! must outlive single jobs (rate-limit records, tool probe results) and
//! hands each request to its own task so the caller never waits on a job.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use sealbox_core::config::SealConfig;
use sealbox_core::error::{truncate_chars, USER_MESSAGE_LIMIT};
use sealbox_core::types::{DecryptReport, EncryptChoice, EncryptReport, PassphraseSource};
use sealbox_core::{SealError, SealResult};
use sealbox_secrets::{HsmRandomProvider, Passphrase, PassphraseGenerator, Pin};

use crate::decrypt::DecryptionOrchestrator;
use crate::encrypt::{EncryptJob, EncryptionOrchestrator};
use crate::host::{Notifier, Prompter};
use crate::probe::ToolProbes;
use crate::rate_limit::RateLimiter;

/// Fire-and-forget requests accepted by [`SealService::spawn`].
#[derive(Debug, Clone)]
pub enum Request {
    Encrypt(Vec<PathBuf>),
    EncryptWithHsm(Vec<PathBuf>),
    Decrypt(Vec<PathBuf>),
}

/// Terminal state of a request. `Cancelled` covers a dismissed prompt.
#[derive(Debug)]
pub enum Outcome {
    Encrypted(EncryptReport),
    Decrypted(DecryptReport),
    Cancelled,
}

pub struct SealService {
    config: SealConfig,
    prompter: Arc<dyn Prompter>,
    notifier: Arc<dyn Notifier>,
    limiter: Mutex<RateLimiter>,
    probes: ToolProbes,
    encryptor: EncryptionOrchestrator,
    decryptor: DecryptionOrchestrator,
    #[cfg(test)]
    hsm_modules: Option<Vec<PathBuf>>,
}

impl SealService {
    pub fn new(config: SealConfig, prompter: Arc<dyn Prompter>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            limiter: Mutex::new(RateLimiter::new(&config.rate_limit)),
            probes: ToolProbes::new(&config),
            encryptor: EncryptionOrchestrator::new(&config),
            decryptor: DecryptionOrchestrator::new(&config),
            config,
            prompter,
            notifier,
            #[cfg(test)]
            hsm_modules: None,
        }
    }

    pub fn config(&self) -> &SealConfig {
        &self.config
    }

    /// Run `request` on its own task. The outcome is reported through the
    /// notifier; the handle is only needed by callers that must wait.
    pub fn spawn(self: Arc<Self>, request: Request) -> JoinHandle<SealResult<Outcome>> {
        tokio::spawn(async move {
            match request {
                Request::Encrypt(paths) => self.encrypt(paths).await,
                Request::EncryptWithHsm(paths) => self.encrypt_with_hsm(paths).await,
                Request::Decrypt(paths) => self.decrypt(paths).await,
            }
        })
    }

    /// Encrypt with a generated wordlist passphrase.
    pub async fn encrypt(&self, paths: Vec<PathBuf>) -> SealResult<Outcome> {
        if !self.probes.age_available().await {
            let err = SealError::ToolUnavailable(self.config.tools.age.display().to_string());
            self.notifier.report_error("Encryption Failed", &err.to_string());
            return Err(err);
        }

        let generator = PassphraseGenerator::new(self.config.passphrase.words)?;
        let passphrase = generator.generate();
        tracing::debug!(words = generator.word_count(), bits = generator.entropy_bits(), "passphrase generated");

        self.encrypt_with(paths, passphrase, PassphraseSource::Wordlist).await
    }

    /// Encrypt with a passphrase drawn from the hardware token.
    pub async fn encrypt_with_hsm(&self, paths: Vec<PathBuf>) -> SealResult<Outcome> {
        if !self.probes.age_available().await {
            let err = SealError::ToolUnavailable(self.config.tools.age.display().to_string());
            self.notifier.report_error("Encryption Failed", &err.to_string());
            return Err(err);
        }

        let mut provider = self.hsm_provider();
        let Some(module) = provider.find_module() else {
            self.notifier.report_error(
                "HSM Not Found",
                "SafeNet eToken driver not installed. Install libeToken.so and try again.",
            );
            return Err(SealError::Hardware);
        };
        if !provider.is_token_present(&module).await {
            self.notifier
                .report_error("Token Not Connected", "Please insert your token and try again.");
            return Err(SealError::Hardware);
        }

        let Some(raw_pin) = self
            .prompt(|p| p.ask_secret("HSM PIN", "Enter token PIN:"))
            .await?
        else {
            return Ok(Outcome::Cancelled);
        };
        let pin = match Pin::validate(raw_pin) {
            Ok(pin) => pin,
            Err(e) => {
                self.notifier.report_error("Invalid PIN", &e.user_message(USER_MESSAGE_LIMIT));
                return Err(e);
            }
        };

        self.notifier.notify("Generating...", "Getting random from HSM...");
        let passphrase = match provider.extract_random(&module, &pin).await {
            Ok(p) => p,
            Err(e) => {
                self.notifier
                    .report_error("HSM Error", "Failed to generate random from token. Check PIN and try again.");
                return Err(e);
            }
        };
        drop(pin);

        self.encrypt_with(paths, passphrase, PassphraseSource::Hardware).await
    }

    async fn encrypt_with(
        &self,
        paths: Vec<PathBuf>,
        passphrase: Passphrase,
        source: PassphraseSource,
    ) -> SealResult<Outcome> {
        let (passphrase, choice) = self
            .prompt(move |p| {
                let choice = p.reveal_passphrase(&passphrase, source);
                (passphrase, choice)
            })
            .await?;
        let delete_originals = match choice {
            EncryptChoice::KeepOriginals => false,
            EncryptChoice::DeleteOriginals => true,
            EncryptChoice::Cancel => return Ok(Outcome::Cancelled),
        };

        let scrub = self.probes.mat2_available().await;
        let title = match source {
            PassphraseSource::Wordlist => "Encrypting...",
            PassphraseSource::Hardware => "Encrypting (HSM)...",
        };
        self.notifier
            .notify(title, &format!("Processing {} item(s)...", paths.len()));

        let job = EncryptJob {
            paths,
            passphrase,
            delete_originals,
            scrub,
        };
        match self.encryptor.run(job).await {
            Ok(report) => {
                self.notifier.notify("Encryption Complete", &report.summary());
                Ok(Outcome::Encrypted(report))
            }
            Err(e) => {
                tracing::error!("encryption failed: {e}");
                self.notifier
                    .report_error("Encryption Failed", &e.user_message(USER_MESSAGE_LIMIT));
                Err(e)
            }
        }
    }

    pub async fn decrypt(&self, paths: Vec<PathBuf>) -> SealResult<Outcome> {
        // Held for the whole job so attempt records change one job at a time
        let mut limiter = self.limiter.lock().await;

        if let Err(e) = self.decryptor.preflight(&paths, &mut limiter) {
            let title = match &e {
                SealError::RateLimited { .. } => "Rate Limited",
                _ => "Invalid files",
            };
            self.notifier.report_error(title, &e.user_message(USER_MESSAGE_LIMIT));
            return Err(e);
        }

        let Some(secret) = self
            .prompt(|p| p.ask_secret("Decrypt", "Enter password:"))
            .await?
        else {
            return Ok(Outcome::Cancelled);
        };
        let passphrase = Passphrase::from(secret);
        if passphrase.is_empty() {
            return Ok(Outcome::Cancelled);
        }

        let report = self.decryptor.run(&paths, &passphrase, &mut limiter).await;
        if report.succeeded > 0 {
            self.notifier
                .notify("Done", &format!("{} file(s) decrypted", report.succeeded));
        }
        if report.failed > 0 {
            let detail = format!("Failed: {} file(s).\n{}", report.failed, report.errors.join("\n"));
            self.notifier.report_error(
                "Error",
                &truncate_chars(&detail, USER_MESSAGE_LIMIT),
            );
        }
        Ok(Outcome::Decrypted(report))
    }

    fn hsm_provider(&self) -> HsmRandomProvider {
        #[cfg(test)]
        {
            if let Some(modules) = &self.hsm_modules {
                return HsmRandomProvider::with_allow_list(&self.config, modules.clone());
            }
        }
        HsmRandomProvider::new(&self.config)
    }

    /// Run a prompt on a blocking thread; prompters may wait on the user.
    async fn prompt<T, F>(&self, f: F) -> SealResult<T>
    where
        F: FnOnce(&dyn Prompter) -> T + Send + 'static,
        T: Send + 'static,
    {
        let prompter = Arc::clone(&self.prompter);
        tokio::task::spawn_blocking(move || f(prompter.as_ref()))
            .await
            .map_err(|e| SealError::Other(anyhow::anyhow!("prompt task failed: {e}")))
    }
}

impl std::fmt::Debug for SealService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
