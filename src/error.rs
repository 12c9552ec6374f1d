//! Error taxonomy for the verification pipeline.

use thiserror::Error;

/// Non-fatal pipeline errors. Each sweep catches these per entry, logs
/// them, and moves on; they never abort a sweep. Fatal conditions
/// (store open, listener bind, signing key load) propagate through
/// `anyhow` at startup instead.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Schema mismatch, wrong issuer, missing chain link, or attribute
    /// mismatch. The offending escrow entry is removed and no webhook
    /// is sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Credential was revoked before being presented. The entry is
    /// promoted to the received escrow under a revocation action.
    #[error("revoked credential {0} being presented")]
    InvalidCredentialState(String),

    /// Bytes or an embedded sub-message failed to parse. The source
    /// notice is removed so poison messages cannot block the queue.
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl VerifyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        VerifyError::Validation(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        VerifyError::Malformed(msg.into())
    }
}
