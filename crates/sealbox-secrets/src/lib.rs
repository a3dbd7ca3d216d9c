//! sealbox-secrets: secret material handling
//!
//! - `passphrase`: the `Passphrase` secret type and the wordlist generator
//! - `secure_temp`: owner-only temporary files that are shredded on every exit path
//! - `hsm`: PKCS#11 token discovery and true-random passphrase extraction

pub mod hsm;
pub mod passphrase;
pub mod secure_temp;
pub mod wordlist;

pub use hsm::{HsmRandomProvider, HsmState, ModuleDescriptor, Pin};
pub use passphrase::{Passphrase, PassphraseGenerator};
pub use secure_temp::{secure_delete, EraseOutcome, SecureTempResource};
