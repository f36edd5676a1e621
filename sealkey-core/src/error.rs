//! Error type shared by every sealkey crate.
//!
//! The variants follow the failure taxonomy of the authentication path:
//! capability problems are permanent, verification problems are recoverable
//! by the user, and malformed signature input aborts only the single
//! authentication attempt that produced it.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The credential store, key-generation tool or consent verifier is not
    /// present on this platform.  Permanent; surfaced once, never retried.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The user declined or failed the biometric / consent check.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The secret read back after a write did not match what was written.
    #[error("stored secret integrity check failed for {0}")]
    SecretIntegrity(String),

    #[error("no stored secret for {0}")]
    SecretNotFound(String),

    /// DER parse failure, undersized authenticator data, oversized field.
    #[error("malformed signature input: {0}")]
    MalformedSignature(String),

    /// The UI channel backing an authenticator request went away.
    #[error("authenticator channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("SSH key error: {0}")]
    SshKey(#[from] ssh_key::Error),

    #[error("SSH encoding error: {0}")]
    Encoding(#[from] ssh_encoding::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the user may retry the whole operation with a new request.
    ///
    /// Capability failures are permanent; malformed input will not improve
    /// on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VerificationFailed(_) | Self::ChannelUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
