//! Challenge generation.
//!
//! A challenge is a fresh 256-bit nonce bound to an application identifier
//! and the set of facets allowed to answer it. The engine never keeps
//! challenges: the caller installs the returned [`Challenge`] on the device
//! record, which is its only holder.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::device::Credential;
use crate::encoding::{b64url, b64url_encode};
use crate::error::{ProtocolError, Result, U2F_VERSION};
use crate::messages::{RegisterRequestMessage, RegistrationChallenge, SignRequestMessage};

/// Nonce length in bytes (256 bits).
pub const NONCE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Registration,
    Authentication,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outstanding challenge, persisted on the device record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(with = "b64url")]
    pub nonce: Vec<u8>,
    pub application_id: String,
    pub trusted_facets: Vec<String>,
    pub kind: ChallengeKind,
    pub issued_at: DateTime<Utc>,
}

impl Challenge {
    /// Nonce as it appears in request messages and client data.
    pub fn encoded_nonce(&self) -> String {
        b64url_encode(&self.nonce)
    }

    /// SHA-256 of the application identifier ("application parameter").
    pub fn application_parameter(&self) -> [u8; 32] {
        Sha256::digest(self.application_id.as_bytes()).into()
    }

    /// Whether the challenge is older than `ttl`. `None` never expires.
    pub fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            Some(ttl) => now.signed_duration_since(self.issued_at) > ttl,
            None => false,
        }
    }
}

/// Source of challenge nonces.
///
/// Implementations must be cryptographically secure; the default is the
/// operating system RNG.
pub trait NonceSource: Send + Sync {
    fn fill_nonce(&self, nonce: &mut [u8]) -> Result<()>;
}

/// Operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsNonceSource;

impl NonceSource for OsNonceSource {
    fn fill_nonce(&self, nonce: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(nonce)
            .map_err(|e| ProtocolError::EntropyUnavailable(e.to_string()))
    }
}

/// Issues registration and authentication challenges.
pub struct ChallengeEngine {
    source: Box<dyn NonceSource>,
}

impl ChallengeEngine {
    pub fn new() -> Self {
        Self::with_source(OsNonceSource)
    }

    pub fn with_source(source: impl NonceSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Create a registration challenge. `existing_credentials` are listed in
    /// the request so the token can refuse to register a second time.
    pub fn registration_challenge(
        &self,
        application_id: &str,
        trusted_facets: &[String],
        existing_credentials: &[Credential],
    ) -> Result<(Challenge, RegisterRequestMessage)> {
        let challenge =
            self.new_challenge(ChallengeKind::Registration, application_id, trusted_facets)?;

        let request = RegisterRequestMessage {
            application_id: challenge.application_id.clone(),
            registration_challenges: vec![RegistrationChallenge {
                version: U2F_VERSION.to_string(),
                challenge: challenge.encoded_nonce(),
            }],
            registered_credentials: existing_credentials
                .iter()
                .map(Credential::registered_key)
                .collect(),
        };

        Ok((challenge, request))
    }

    /// Create an authentication challenge for a device holding
    /// `existing_credentials`. A device without credentials cannot sign.
    pub fn authentication_challenge(
        &self,
        application_id: &str,
        trusted_facets: &[String],
        existing_credentials: &[Credential],
    ) -> Result<(Challenge, SignRequestMessage)> {
        if existing_credentials.is_empty() {
            return Err(ProtocolError::NotRegistered);
        }

        let challenge =
            self.new_challenge(ChallengeKind::Authentication, application_id, trusted_facets)?;

        let request = SignRequestMessage {
            application_id: challenge.application_id.clone(),
            challenge: challenge.encoded_nonce(),
            registered_credentials: existing_credentials
                .iter()
                .map(Credential::registered_key)
                .collect(),
        };

        Ok((challenge, request))
    }

    fn new_challenge(
        &self,
        kind: ChallengeKind,
        application_id: &str,
        trusted_facets: &[String],
    ) -> Result<Challenge> {
        let mut nonce = vec![0u8; NONCE_LEN];
        self.source.fill_nonce(&mut nonce)?;

        // A stuck RNG returns zeros; never hand that out as a challenge.
        if nonce.iter().all(|b| *b == 0) {
            return Err(ProtocolError::EntropyUnavailable(
                "nonce source returned all zero bytes".to_string(),
            ));
        }

        Ok(Challenge {
            nonce,
            application_id: application_id.to_string(),
            trusted_facets: trusted_facets.to_vec(),
            kind,
            issued_at: Utc::now(),
        })
    }
}

impl Default for ChallengeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChallengeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeEngine")
            .field("source", &"<nonce source>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroSource;

    impl NonceSource for ZeroSource {
        fn fill_nonce(&self, nonce: &mut [u8]) -> Result<()> {
            nonce.fill(0);
            Ok(())
        }
    }

    fn facets() -> Vec<String> {
        vec!["https://example.test".to_string()]
    }

    fn credential(key_handle: &[u8]) -> Credential {
        Credential {
            key_handle: key_handle.to_vec(),
            public_key: vec![4u8; 65],
            counter: 0,
            attestation_certificate: None,
        }
    }

    #[test]
    fn test_registration_challenge_embeds_existing_credentials() {
        let engine = ChallengeEngine::new();
        let (challenge, request) = engine
            .registration_challenge("https://example.test", &facets(), &[credential(b"kh-1")])
            .unwrap();

        assert_eq!(challenge.kind, ChallengeKind::Registration);
        assert_eq!(challenge.nonce.len(), NONCE_LEN);
        assert_eq!(request.application_id, "https://example.test");
        assert_eq!(request.registration_challenges.len(), 1);
        assert_eq!(
            request.registration_challenges[0].challenge,
            challenge.encoded_nonce()
        );
        assert_eq!(
            request.registered_credentials[0].key_handle,
            b64url_encode(b"kh-1")
        );
    }

    #[test]
    fn test_nonces_are_unique() {
        let engine = ChallengeEngine::new();
        let (a, _) = engine
            .registration_challenge("https://example.test", &facets(), &[])
            .unwrap();
        let (b, _) = engine
            .registration_challenge("https://example.test", &facets(), &[])
            .unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_authentication_challenge_requires_credentials() {
        let engine = ChallengeEngine::new();
        let result = engine.authentication_challenge("https://example.test", &facets(), &[]);
        assert!(matches!(result, Err(ProtocolError::NotRegistered)));
    }

    #[test]
    fn test_zero_nonce_is_rejected() {
        let engine = ChallengeEngine::with_source(ZeroSource);
        let result = engine.registration_challenge("https://example.test", &facets(), &[]);
        assert!(matches!(result, Err(ProtocolError::EntropyUnavailable(_))));
    }

    #[test]
    fn test_expiry() {
        let engine = ChallengeEngine::new();
        let (mut challenge, _) = engine
            .registration_challenge("https://example.test", &facets(), &[])
            .unwrap();
        let now = Utc::now();
        challenge.issued_at = now - Duration::seconds(301);

        assert!(challenge.is_expired(Some(Duration::seconds(300)), now));
        assert!(!challenge.is_expired(Some(Duration::seconds(600)), now));
        assert!(!challenge.is_expired(None, now));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ChallengeKind::Authentication).unwrap();
        assert_eq!(json, "\"authentication\"");
    }
}
