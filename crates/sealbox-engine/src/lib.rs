//! sealbox-engine: the encryption and decryption workflows.
//!
//! Leaf components (path validation, rate limiting, metadata scrubbing,
//! archiving, terminal secret injection, publishing) are composed by the two
//! orchestrators, which [`SealService`] drives on behalf of a host.

pub mod archive;
pub mod decrypt;
pub mod encrypt;
pub mod host;
pub mod inject;
pub mod path_guard;
pub mod probe;
pub mod publish;
pub mod rate_limit;
pub mod scrub;
pub mod service;
pub mod staging;

pub use archive::ArchiveBundler;
pub use decrypt::{verify_age_file, DecryptionOrchestrator};
pub use encrypt::{EncryptJob, EncryptionOrchestrator};
pub use host::{Notifier, Prompter};
pub use inject::SecretInjector;
pub use path_guard::PathValidator;
pub use rate_limit::{RateDecision, RateLimiter};
pub use scrub::MetadataScrubber;
pub use service::{Outcome, Request, SealService};
