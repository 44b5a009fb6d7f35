//! Authentication verification.
//!
//! Raw signature message layout (FIDO U2F raw message formats, 5.4):
//!
//! ```text
//! user presence (1) | counter (4, big-endian) | signature (DER)
//! ```
//!
//! The signature covers
//! `SHA256(app_id) | user presence | counter | SHA256(client_data)`.

use chrono::{DateTime, Utc};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::challenge::ChallengeKind;
use crate::client_data::SignedClientData;
use crate::device::DeviceRecord;
use crate::encoding::{b64url, b64url_decode};
use crate::error::{ProtocolError, Result};
use crate::messages::SignResponse;
use crate::policy::VerificationPolicy;

/// User-presence bit in the flags byte.
pub const USER_PRESENCE_FLAG: u8 = 0x01;

/// Fields of a raw signature message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    pub flags: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

impl SignatureData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() <= 5 {
            return Err(ProtocolError::MalformedResponse(
                "signature_data: truncated".to_string(),
            ));
        }
        let counter = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        Ok(Self {
            flags: data[0],
            counter,
            signature: data[5..].to_vec(),
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & USER_PRESENCE_FLAG != 0
    }

    fn signed_bytes(&self, application_parameter: &[u8; 32], challenge_parameter: &[u8; 32]) -> Vec<u8> {
        let mut message = Vec::with_capacity(32 + 1 + 4 + 32);
        message.extend_from_slice(application_parameter);
        message.push(self.flags);
        message.extend_from_slice(&self.counter.to_be_bytes());
        message.extend_from_slice(challenge_parameter);
        message
    }
}

/// Identity established by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedCredential {
    pub device_name: String,
    #[serde(with = "b64url")]
    pub key_handle: Vec<u8>,
    pub counter: u32,
}

/// Verify a signed authentication response against the record's outstanding
/// authentication challenge and advance the credential counter.
///
/// As with [`crate::register`], the outstanding challenge is consumed as
/// soon as it is found and the caller persists `record` in every outcome
/// but `NotRegistered`.
///
/// The counter is checked before the client data and the signature, so a
/// presented counter that does not exceed the stored one is always reported
/// as [`ProtocolError::ReplayDetected`] whatever else is wrong with the
/// response.
pub fn authenticate(
    record: &mut DeviceRecord,
    response: &SignResponse,
    policy: &VerificationPolicy,
    now: DateTime<Utc>,
) -> Result<VerifiedCredential> {
    let challenge = record.take_challenge(ChallengeKind::Authentication, policy, now)?;

    let key_handle = b64url_decode("key_handle", &response.key_handle)?;
    let index = record
        .credentials
        .iter()
        .position(|credential| credential.key_handle == key_handle)
        .ok_or(ProtocolError::UnknownCredential)?;

    let raw = b64url_decode("signature_data", &response.signature_data)?;
    let signature_data = SignatureData::parse(&raw)?;

    let stored = record.credentials[index].counter;
    if signature_data.counter <= stored {
        return Err(ProtocolError::ReplayDetected {
            stored,
            presented: signature_data.counter,
        });
    }

    let client_data = SignedClientData::decode(&response.client_data)?;
    client_data.verify_binding(&challenge)?;

    if !signature_data.user_present() {
        return Err(ProtocolError::UserPresenceRequired);
    }

    let key = VerifyingKey::from_sec1_bytes(&record.credentials[index].public_key)
        .map_err(|_| ProtocolError::SignatureVerificationFailed)?;
    let signature = Signature::from_der(&signature_data.signature)
        .map_err(|_| ProtocolError::SignatureVerificationFailed)?;
    key.verify(
        &signature_data.signed_bytes(&challenge.application_parameter(), &client_data.hash()),
        &signature,
    )
    .map_err(|_| ProtocolError::SignatureVerificationFailed)?;

    record.credentials[index].counter = signature_data.counter;

    Ok(VerifiedCredential {
        device_name: record.name.clone(),
        key_handle,
        counter: signature_data.counter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signature_data() {
        let data = [0x01, 0x00, 0x00, 0x01, 0x02, 0x30, 0x06];
        let parsed = SignatureData::parse(&data).unwrap();
        assert!(parsed.user_present());
        assert_eq!(parsed.counter, 258);
        assert_eq!(parsed.signature, vec![0x30, 0x06]);
    }

    #[test]
    fn test_parse_rejects_missing_signature() {
        let err = SignatureData::parse(&[0x01, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResponse(_)));
    }

    #[test]
    fn test_user_presence_flag() {
        let parsed = SignatureData::parse(&[0x00, 0, 0, 0, 1, 0x30]).unwrap();
        assert!(!parsed.user_present());
    }
}
