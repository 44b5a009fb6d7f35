use thiserror::Error;

/// Protocol version string carried in every U2F request message.
pub const U2F_VERSION: &str = "U2F_V2";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("device not registered or no outstanding challenge")]
    NotRegistered,

    #[error("client data does not match the outstanding challenge: {0}")]
    ChallengeMismatch(String),

    #[error("outstanding challenge is for {outstanding}, response is for {attempted}")]
    ChallengeKindMismatch {
        outstanding: &'static str,
        attempted: &'static str,
    },

    #[error("outstanding challenge expired")]
    ChallengeExpired,

    #[error("no registered credential matches the key handle")]
    UnknownCredential,

    #[error("attestation verification failed: {0}")]
    AttestationVerificationFailed(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("counter did not increase: stored={stored}, presented={presented}")]
    ReplayDetected { stored: u32, presented: u32 },

    #[error("user presence flag not set")]
    UserPresenceRequired,

    #[error("key handle is already registered for this device")]
    DuplicateCredential,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("challenge nonce reused")]
    NonceReuse,
}

impl ProtocolError {
    /// Stable identifier for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotRegistered => "NOT_REGISTERED",
            Self::ChallengeMismatch(_) => "CHALLENGE_MISMATCH",
            Self::ChallengeKindMismatch { .. } => "CHALLENGE_KIND_MISMATCH",
            Self::ChallengeExpired => "CHALLENGE_EXPIRED",
            Self::UnknownCredential => "UNKNOWN_CREDENTIAL",
            Self::AttestationVerificationFailed(_) => "ATTESTATION_VERIFICATION_FAILED",
            Self::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
            Self::ReplayDetected { .. } => "REPLAY_DETECTED",
            Self::UserPresenceRequired => "USER_PRESENCE_REQUIRED",
            Self::DuplicateCredential => "DUPLICATE_CREDENTIAL",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::EntropyUnavailable(_) => "ENTROPY_UNAVAILABLE",
            Self::NonceReuse => "NONCE_REUSE",
        }
    }

    /// True for failures caused by the server itself rather than the device
    /// or the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::EntropyUnavailable(_) | Self::NonceReuse)
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
