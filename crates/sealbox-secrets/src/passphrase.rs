//! Passphrase secret type and wordlist generation.
//!
//! A generated passphrase is `word_count` words drawn independently and
//! uniformly from [`WORDS`] with the OS CSPRNG, joined by `-`. With the
//! default 24 words the entropy is well above 240 bits.
//!
//! The passphrase only lives in memory. It leaves the process through the
//! encryption tool's terminal input and the explicit reveal surface, nothing
//! else.

use rand::rngs::OsRng;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use sealbox_core::{SealError, SealResult};

use crate::wordlist::WORDS;

pub const DEFAULT_WORD_COUNT: usize = 24;

pub const SEPARATOR: char = '-';

/// In-memory passphrase, zeroized on drop.
pub struct Passphrase {
    secret: SecretString,
}

impl Passphrase {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose_secret().is_empty()
    }

    pub fn len(&self) -> usize {
        self.expose_secret().len()
    }

    /// The passphrase followed by a newline, as typed at a prompt.
    pub fn to_line(&self) -> Zeroizing<Vec<u8>> {
        let secret = self.expose_secret().as_bytes();
        let mut line = Zeroizing::new(Vec::with_capacity(secret.len() + 1));
        line.extend_from_slice(secret);
        line.push(b'\n');
        line
    }
}

impl From<SecretString> for Passphrase {
    fn from(secret: SecretString) -> Self {
        Self::new(secret)
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passphrase")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Wordlist passphrase generator. Stateless between calls.
#[derive(Debug, Clone, Copy)]
pub struct PassphraseGenerator {
    word_count: usize,
}

impl Default for PassphraseGenerator {
    fn default() -> Self {
        Self {
            word_count: DEFAULT_WORD_COUNT,
        }
    }
}

impl PassphraseGenerator {
    pub fn new(word_count: usize) -> SealResult<Self> {
        if word_count == 0 {
            return Err(SealError::validation("passphrase word count must be at least 1"));
        }
        Ok(Self { word_count })
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Estimated entropy: `word_count * log2(corpus size)`.
    pub fn entropy_bits(&self) -> f64 {
        self.word_count as f64 * (WORDS.len() as f64).log2()
    }

    pub fn generate(&self) -> Passphrase {
        let longest = WORDS.iter().map(|w| w.len()).max().unwrap_or(0);
        let mut out = String::with_capacity(self.word_count * (longest + 1));
        let mut rng = OsRng;

        for i in 0..self.word_count {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(WORDS[rng.gen_range(0..WORDS.len())]);
        }

        Passphrase::new(SecretString::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_generates_24_words() {
        let pass = PassphraseGenerator::default().generate();
        assert_eq!(pass.expose_secret().split(SEPARATOR).count(), 24);
    }

    #[test]
    fn test_entropy_exceeds_225_bits() {
        assert!(PassphraseGenerator::default().entropy_bits() > 225.0);
    }

    #[test]
    fn test_zero_words_rejected() {
        assert!(PassphraseGenerator::new(0).is_err());
    }

    #[test]
    fn test_generations_differ() {
        let gen = PassphraseGenerator::default();
        let a = gen.generate();
        let b = gen.generate();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn test_corpus_is_unique_lowercase() {
        let unique: HashSet<_> = WORDS.iter().collect();
        assert_eq!(unique.len(), WORDS.len(), "corpus must not contain duplicates");
        assert!(WORDS.len() >= 900);
        for word in WORDS {
            assert!(word.chars().all(|c| c.is_ascii_lowercase()), "bad word: {word}");
        }
    }

    #[test]
    fn test_debug_is_redacted() {
        let pass = Passphrase::new(SecretString::from("hunter2-hunter2"));
        let rendered = format!("{pass:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_to_line_appends_newline() {
        let pass = Passphrase::new(SecretString::from("alpha-beta"));
        assert_eq!(pass.to_line().as_slice(), b"alpha-beta\n");
    }

    proptest! {
        #[test]
        fn prop_tokens_come_from_corpus(n in 1usize..64) {
            let pass = PassphraseGenerator::new(n).unwrap().generate();
            let tokens: Vec<&str> = pass.expose_secret().split(SEPARATOR).collect();
            prop_assert_eq!(tokens.len(), n);
            for token in tokens {
                prop_assert!(WORDS.contains(&token));
                prop_assert!(token.chars().all(|c| c.is_ascii_lowercase()));
            }
        }
    }
}
