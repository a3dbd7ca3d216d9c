use thiserror::Error;

pub type SealResult<T> = Result<T, SealError>;

/// Longest error detail forwarded to the user-facing notification channel.
pub const USER_MESSAGE_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum SealError {
    /// Bad path, bad PIN, not an encrypted file, archive traversal
    #[error("validation error: {0}")]
    Validation(String),

    /// A required external program is not installed
    #[error("required tool not available: {0}")]
    ToolUnavailable(String),

    #[error("{step} timed out after {secs}s")]
    Timeout { step: String, secs: u64 },

    /// Non-zero exit. Stderr stays in the local log, never in this message.
    #[error("{tool} failed (exit {code})")]
    Subprocess { tool: String, code: String },

    /// Generic by contract; the specific cause is only logged locally
    #[error("HSM error: could not obtain random data from the token")]
    Hardware,

    #[error("too many failed attempts, wait {remaining_secs} seconds")]
    RateLimited { remaining_secs: u64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SealError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SealError::Validation(msg.into())
    }

    pub fn timeout(step: impl Into<String>, limit: std::time::Duration) -> Self {
        SealError::Timeout {
            step: step.into(),
            secs: limit.as_secs(),
        }
    }

    /// Render for a notification, truncated to `limit` characters.
    pub fn user_message(&self, limit: usize) -> String {
        truncate_chars(&self.to_string(), limit)
    }
}

/// Truncate on a character boundary, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}
