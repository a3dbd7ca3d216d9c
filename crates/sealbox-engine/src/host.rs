//! Collaborators supplied by the host integration (CLI, file manager, ...).
//!
//! Implementations may block; the service calls prompts from a blocking
//! worker thread.

use secrecy::SecretString;

use sealbox_core::types::{EncryptChoice, PassphraseSource};
use sealbox_secrets::Passphrase;

pub trait Prompter: Send + Sync {
    /// Ask for a secret (decryption password, token PIN). `None` = cancelled.
    fn ask_secret(&self, title: &str, text: &str) -> Option<SecretString>;

    /// Show a generated passphrase and ask how to proceed. This is the only
    /// place a generated passphrase may be revealed or copied.
    fn reveal_passphrase(&self, passphrase: &Passphrase, source: PassphraseSource) -> EncryptChoice;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);

    fn report_error(&self, title: &str, message: &str);
}
