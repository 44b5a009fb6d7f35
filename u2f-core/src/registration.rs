//! Registration verification.
//!
//! Raw registration message layout (FIDO U2F raw message formats, 4.3):
//!
//! ```text
//! 0x05 | user public key (65) | L (1) | key handle (L) | attestation cert (DER) | signature (DER)
//! ```
//!
//! The certificate carries no length prefix; its DER header determines where
//! the signature starts.

use chrono::{DateTime, Utc};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::challenge::ChallengeKind;
use crate::client_data::SignedClientData;
use crate::device::{Credential, DeviceRecord};
use crate::encoding::b64url_decode;
use crate::error::{ProtocolError, Result};
use crate::messages::RegisterResponse;
use crate::policy::VerificationPolicy;

/// Reserved leading byte of a registration message.
pub const REGISTRATION_RESERVED_BYTE: u8 = 0x05;
/// Uncompressed P-256 point length.
pub const PUBLIC_KEY_LEN: usize = 65;
/// Upper bound for an attestation certificate.
pub const MAX_ATTESTATION_CERT_SIZE: usize = 16 * 1024;

/// Fields of a raw registration message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationData {
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub attestation_certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

impl RegistrationData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let malformed = |msg: &str| ProtocolError::MalformedResponse(format!("registration_data: {msg}"));

        let (&reserved, rest) = data.split_first().ok_or_else(|| malformed("empty"))?;
        if reserved != REGISTRATION_RESERVED_BYTE {
            return Err(malformed("bad reserved byte"));
        }

        if rest.len() < PUBLIC_KEY_LEN + 1 {
            return Err(malformed("truncated public key"));
        }
        let (public_key, rest) = rest.split_at(PUBLIC_KEY_LEN);
        VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|_| malformed("public key is not a P-256 point"))?;

        let (&handle_len, rest) = rest.split_first().ok_or_else(|| malformed("truncated"))?;
        let handle_len = handle_len as usize;
        if handle_len == 0 || rest.len() < handle_len {
            return Err(malformed("truncated key handle"));
        }
        let (key_handle, rest) = rest.split_at(handle_len);

        let (signature, _) = X509Certificate::from_der(rest)
            .map_err(|e| malformed(&format!("attestation certificate: {e}")))?;
        let cert_len = rest.len() - signature.len();
        if cert_len > MAX_ATTESTATION_CERT_SIZE {
            return Err(malformed("attestation certificate too large"));
        }
        if signature.is_empty() {
            return Err(malformed("missing attestation signature"));
        }

        Ok(Self {
            public_key: public_key.to_vec(),
            key_handle: key_handle.to_vec(),
            attestation_certificate: rest[..cert_len].to_vec(),
            signature: signature.to_vec(),
        })
    }

    /// Bytes covered by the attestation signature.
    fn signed_bytes(&self, application_parameter: &[u8; 32], challenge_parameter: &[u8; 32]) -> Vec<u8> {
        let mut message = Vec::with_capacity(
            1 + 32 + 32 + self.key_handle.len() + self.public_key.len(),
        );
        message.push(0x00);
        message.extend_from_slice(application_parameter);
        message.extend_from_slice(challenge_parameter);
        message.extend_from_slice(&self.key_handle);
        message.extend_from_slice(&self.public_key);
        message
    }

    fn verify_attestation(
        &self,
        application_parameter: &[u8; 32],
        challenge_parameter: &[u8; 32],
        roots: &[Vec<u8>],
    ) -> Result<()> {
        let failed = |msg: &str| ProtocolError::AttestationVerificationFailed(msg.to_string());

        let (_, cert) = X509Certificate::from_der(&self.attestation_certificate)
            .map_err(|_| failed("unparseable certificate"))?;

        let key = VerifyingKey::from_sec1_bytes(&cert.public_key().subject_public_key.data)
            .map_err(|_| failed("certificate key is not P-256"))?;
        let signature = Signature::from_der(&self.signature).map_err(|_| failed("bad signature encoding"))?;

        key.verify(
            &self.signed_bytes(application_parameter, challenge_parameter),
            &signature,
        )
        .map_err(|_| failed("signature does not verify"))?;

        if roots.is_empty() {
            return Ok(());
        }

        let trusted = roots.iter().any(|root_der| {
            if root_der.as_slice() == self.attestation_certificate.as_slice() {
                return true;
            }
            match X509Certificate::from_der(root_der) {
                Ok((_, root)) => cert.verify_signature(Some(root.public_key())).is_ok(),
                Err(_) => false,
            }
        });

        if trusted {
            Ok(())
        } else {
            Err(failed("certificate not issued by a trusted root"))
        }
    }
}

/// Verify a registration response against the record's outstanding
/// registration challenge and append the new credential.
///
/// The outstanding challenge is consumed as soon as it is found, so the
/// caller must persist `record` whether this returns `Ok` or `Err` (except
/// for `NotRegistered`, which leaves the record untouched).
pub fn register(
    record: &mut DeviceRecord,
    response: &RegisterResponse,
    policy: &VerificationPolicy,
    now: DateTime<Utc>,
) -> Result<Credential> {
    let challenge = record.take_challenge(ChallengeKind::Registration, policy, now)?;

    let client_data = SignedClientData::decode(&response.client_data)?;
    client_data.verify_binding(&challenge)?;

    let raw = b64url_decode("registration_data", &response.registration_data)?;
    let registration = RegistrationData::parse(&raw)?;

    if policy.require_attestation {
        registration.verify_attestation(
            &challenge.application_parameter(),
            &client_data.hash(),
            &policy.attestation_roots,
        )?;
    } else {
        tracing::debug!(device = %record.name, "Attestation verification skipped by policy");
    }

    if record.credential(&registration.key_handle).is_some() {
        return Err(ProtocolError::DuplicateCredential);
    }

    let credential = Credential {
        key_handle: registration.key_handle,
        public_key: registration.public_key,
        counter: 0,
        attestation_certificate: Some(registration.attestation_certificate),
    };
    record.credentials.push(credential.clone());

    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_bad_reserved_byte() {
        let mut data = vec![0x04];
        data.extend_from_slice(&[0u8; 100]);
        assert!(matches!(
            RegistrationData::parse(&data),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_truncated_message() {
        assert!(RegistrationData::parse(&[]).is_err());
        assert!(RegistrationData::parse(&[REGISTRATION_RESERVED_BYTE, 0x04]).is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_point() {
        let mut data = vec![REGISTRATION_RESERVED_BYTE, 0x04];
        data.extend_from_slice(&[0xffu8; 64]);
        data.push(4);
        data.extend_from_slice(b"kh-1");
        data.extend_from_slice(b"not a certificate");
        let err = RegistrationData::parse(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResponse(msg) if msg.contains("P-256")));
    }
}
