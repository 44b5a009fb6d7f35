//! Verification policy shared by the registration and authentication verifiers.

use chrono::Duration;

/// Default lifetime of an issued challenge (5 minutes).
pub const DEFAULT_CHALLENGE_TTL_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    /// Verify the attestation signature (and chain, when roots are set).
    ///
    /// Turning this off accepts any well-formed registration, which is only
    /// appropriate for fleets of self-attesting tokens the operator trusts
    /// out of band.
    pub require_attestation: bool,
    /// DER certificates a registering token's attestation certificate must
    /// equal or be signed by. Empty accepts any certificate whose signature
    /// over the registration verifies.
    pub attestation_roots: Vec<Vec<u8>>,
    /// Wall-clock lifetime of an issued challenge; `None` relies purely on
    /// single-use consumption.
    pub challenge_ttl: Option<Duration>,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            require_attestation: true,
            attestation_roots: Vec::new(),
            challenge_ttl: Some(Duration::seconds(DEFAULT_CHALLENGE_TTL_SECS)),
        }
    }
}
