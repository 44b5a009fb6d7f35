//! Client data parsing and challenge binding.
//!
//! The browser wraps the challenge into a small JSON document and the token
//! signs its SHA-256 hash, so the exact bytes received must be hashed rather
//! than a re-serialization of the parsed value.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::challenge::{Challenge, ChallengeKind};
use crate::encoding::b64url_decode;
use crate::error::{ProtocolError, Result};

/// `typ` value for registration client data.
pub const TYP_REGISTRATION: &str = "navigator.id.finishEnrollment";
/// `typ` value for authentication client data.
pub const TYP_AUTHENTICATION: &str = "navigator.id.getAssertion";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    pub typ: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid_pubkey: Option<serde_json::Value>,
}

/// Client data together with the raw bytes the token hashed.
#[derive(Debug, Clone)]
pub struct SignedClientData {
    pub raw: Vec<u8>,
    pub parsed: ClientData,
}

impl SignedClientData {
    /// Decode the base64url `client_data` field of a response.
    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = b64url_decode("client_data", encoded)?;
        let parsed = serde_json::from_slice(&raw)
            .map_err(|e| ProtocolError::MalformedResponse(format!("client_data: {e}")))?;
        Ok(Self { raw, parsed })
    }

    /// SHA-256 of the raw client data ("challenge parameter").
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(&self.raw).into()
    }

    /// Check that the client data answers `challenge` from a trusted facet.
    pub fn verify_binding(&self, challenge: &Challenge) -> Result<()> {
        let expected_typ = typ_for(challenge.kind);
        if self.parsed.typ != expected_typ {
            return Err(ProtocolError::ChallengeMismatch(format!(
                "typ {:?}, expected {expected_typ:?}",
                self.parsed.typ
            )));
        }

        if self.parsed.challenge != challenge.encoded_nonce() {
            return Err(ProtocolError::ChallengeMismatch("nonce".to_string()));
        }

        if !challenge
            .trusted_facets
            .iter()
            .any(|facet| facet == &self.parsed.origin)
        {
            return Err(ProtocolError::ChallengeMismatch(format!(
                "untrusted origin {:?}",
                self.parsed.origin
            )));
        }

        Ok(())
    }
}

pub fn typ_for(kind: ChallengeKind) -> &'static str {
    match kind {
        ChallengeKind::Registration => TYP_REGISTRATION,
        ChallengeKind::Authentication => TYP_AUTHENTICATION,
    }
}
