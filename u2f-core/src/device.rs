//! Device records and registered credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::challenge::{Challenge, ChallengeKind};
use crate::encoding::{b64url, b64url_encode, b64url_opt};
use crate::error::{ProtocolError, Result};
use crate::messages::RegisteredKey;
use crate::policy::VerificationPolicy;

/// Normalize a device name: trimmed and lower-cased. Returns `None` for an
/// empty name.
pub fn normalize_device_name(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// A public-key credential produced by one successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(with = "b64url")]
    pub key_handle: Vec<u8>,
    /// Uncompressed SEC1 P-256 point (65 bytes)
    #[serde(with = "b64url")]
    pub public_key: Vec<u8>,
    /// Last counter value seen from the token
    pub counter: u32,
    #[serde(default, with = "b64url_opt", skip_serializing_if = "Option::is_none")]
    pub attestation_certificate: Option<Vec<u8>>,
}

impl Credential {
    pub fn registered_key(&self) -> RegisteredKey {
        RegisteredKey::new(b64url_encode(&self.key_handle))
    }
}

/// Everything stored for one device name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    #[serde(default)]
    pub credentials: Vec<Credential>,
    #[serde(default)]
    pub pending_challenge: Option<Challenge>,
    #[serde(default)]
    pub role_name: String,
}

impl DeviceRecord {
    /// New empty record. Returns `None` when the name normalizes to empty.
    pub fn new(name: &str) -> Option<Self> {
        Some(Self {
            name: normalize_device_name(name)?,
            credentials: Vec::new(),
            pending_challenge: None,
            role_name: String::new(),
        })
    }

    /// True once at least one credential has been registered.
    pub fn is_registered(&self) -> bool {
        !self.credentials.is_empty()
    }

    pub fn credential(&self, key_handle: &[u8]) -> Option<&Credential> {
        self.credentials
            .iter()
            .find(|credential| credential.key_handle == key_handle)
    }

    /// Install a freshly issued challenge, replacing any outstanding one.
    ///
    /// Fails with [`ProtocolError::NonceReuse`] if the new nonce equals the
    /// outstanding one: that can only happen with a broken nonce source.
    pub fn install_challenge(&mut self, challenge: Challenge) -> Result<()> {
        if let Some(pending) = &self.pending_challenge {
            if pending.nonce == challenge.nonce {
                return Err(ProtocolError::NonceReuse);
            }
        }
        self.pending_challenge = Some(challenge);
        Ok(())
    }

    /// Remove the outstanding challenge for a verification attempt.
    ///
    /// The challenge is gone from the record as soon as it exists, whatever
    /// the outcome of the checks that follow: a wrong kind or an expired
    /// challenge still consumes it.
    pub fn take_challenge(
        &mut self,
        expected: ChallengeKind,
        policy: &VerificationPolicy,
        now: DateTime<Utc>,
    ) -> Result<Challenge> {
        let challenge = self
            .pending_challenge
            .take()
            .ok_or(ProtocolError::NotRegistered)?;

        if challenge.kind != expected {
            return Err(ProtocolError::ChallengeKindMismatch {
                outstanding: challenge.kind.as_str(),
                attempted: expected.as_str(),
            });
        }

        if challenge.is_expired(policy.challenge_ttl, now) {
            return Err(ProtocolError::ChallengeExpired);
        }

        Ok(challenge)
    }

    /// Drop the outstanding challenge if it outlived `policy.challenge_ttl`.
    /// Returns true when something was removed.
    pub fn clear_expired_challenge(
        &mut self,
        policy: &VerificationPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        let expired = self
            .pending_challenge
            .as_ref()
            .is_some_and(|challenge| challenge.is_expired(policy.challenge_ttl, now));
        if expired {
            self.pending_challenge = None;
        }
        expired
    }
}
