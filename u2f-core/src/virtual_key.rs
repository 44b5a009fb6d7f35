//! Software U2F token for tests and demos.
//!
//! WARNING: keys live in process memory. Never use this to protect anything.
//!
//! The token answers [`RegisterRequestMessage`]s and [`SignRequestMessage`]s
//! the way a hardware token reached through a browser would, including the
//! browser-side client data.

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::authentication::USER_PRESENCE_FLAG;
use crate::client_data::{ClientData, TYP_AUTHENTICATION, TYP_REGISTRATION};
use crate::encoding::{b64url_decode, b64url_encode};
use crate::messages::{RegisterRequestMessage, RegisterResponse, SignRequestMessage, SignResponse};
use crate::registration::REGISTRATION_RESERVED_BYTE;

#[derive(Debug, Error)]
pub enum VirtualKeyError {
    #[error("certificate generation failed: {0}")]
    Certificate(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("token already holds one of the registered credentials")]
    AlreadyRegistered,

    #[error("none of the registered credentials belong to this token")]
    NoMatchingCredential,
}

/// Certificate authority that can issue attestation certificates to
/// [`VirtualKey`]s, for exercising attestation root checks.
pub struct AttestationAuthority {
    key_pair: KeyPair,
    certificate: Certificate,
}

impl AttestationAuthority {
    pub fn new(common_name: &str) -> Result<Self, VirtualKeyError> {
        let key_pair = generate_key_pair()?;
        let mut params = certificate_params(common_name);
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let certificate = params
            .self_signed(&key_pair)
            .map_err(|e| VirtualKeyError::Certificate(e.to_string()))?;
        Ok(Self {
            key_pair,
            certificate,
        })
    }

    pub fn certificate_der(&self) -> Vec<u8> {
        self.certificate.der().to_vec()
    }
}

struct VirtualCredential {
    key_handle: Vec<u8>,
    application_parameter: [u8; 32],
    signing_key: SigningKey,
}

/// In-memory U2F token.
pub struct VirtualKey {
    attestation_key: SigningKey,
    attestation_certificate: Vec<u8>,
    credentials: Vec<VirtualCredential>,
    counter: u32,
    origin: Option<String>,
}

impl VirtualKey {
    /// Token with a self-signed attestation certificate.
    pub fn new() -> Result<Self, VirtualKeyError> {
        let key_pair = generate_key_pair()?;
        let certificate = certificate_params("U2F Virtual Key Attestation")
            .self_signed(&key_pair)
            .map_err(|e| VirtualKeyError::Certificate(e.to_string()))?;
        Self::from_parts(&key_pair, certificate.der().to_vec())
    }

    /// Token whose attestation certificate is signed by `authority`.
    pub fn issued_by(authority: &AttestationAuthority) -> Result<Self, VirtualKeyError> {
        let key_pair = generate_key_pair()?;
        let certificate = certificate_params("U2F Virtual Key Attestation")
            .signed_by(&key_pair, &authority.certificate, &authority.key_pair)
            .map_err(|e| VirtualKeyError::Certificate(e.to_string()))?;
        Self::from_parts(&key_pair, certificate.der().to_vec())
    }

    fn from_parts(key_pair: &KeyPair, attestation_certificate: Vec<u8>) -> Result<Self, VirtualKeyError> {
        let attestation_key = SigningKey::from_pkcs8_der(&key_pair.serialize_der())
            .map_err(|e| VirtualKeyError::Certificate(e.to_string()))?;
        Ok(Self {
            attestation_key,
            attestation_certificate,
            credentials: Vec::new(),
            counter: 0,
            origin: None,
        })
    }

    /// Report `origin` in client data instead of the request's application
    /// identifier, like a browser on a different site would.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Last counter value used in a signature.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Overwrite the counter, e.g. to emulate a cloned token.
    pub fn set_counter(&mut self, counter: u32) {
        self.counter = counter;
    }

    /// Key handles of every credential this token created.
    pub fn key_handles(&self) -> Vec<Vec<u8>> {
        self.credentials
            .iter()
            .map(|credential| credential.key_handle.clone())
            .collect()
    }

    /// Create a new credential for the request's application.
    pub fn handle_register_request(
        &mut self,
        request: &RegisterRequestMessage,
    ) -> Result<RegisterResponse, VirtualKeyError> {
        let challenge = request
            .registration_challenges
            .first()
            .ok_or_else(|| VirtualKeyError::Request("no registration challenge".to_string()))?;

        let application_parameter = sha256(request.application_id.as_bytes());
        for registered in &request.registered_credentials {
            let key_handle = b64url_decode("key_handle", &registered.key_handle)
                .map_err(|e| VirtualKeyError::Request(e.to_string()))?;
            if self.owns(&key_handle, &application_parameter) {
                return Err(VirtualKeyError::AlreadyRegistered);
            }
        }

        let client_data = self.client_data(TYP_REGISTRATION, &challenge.challenge, &request.application_id)?;

        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let mut key_handle = vec![0u8; 32];
        OsRng.fill_bytes(&mut key_handle);

        let mut signed = vec![0x00];
        signed.extend_from_slice(&application_parameter);
        signed.extend_from_slice(&sha256(&client_data));
        signed.extend_from_slice(&key_handle);
        signed.extend_from_slice(&public_key);
        let signature: Signature = self.attestation_key.sign(&signed);

        let mut registration_data = vec![REGISTRATION_RESERVED_BYTE];
        registration_data.extend_from_slice(&public_key);
        registration_data.push(key_handle.len() as u8);
        registration_data.extend_from_slice(&key_handle);
        registration_data.extend_from_slice(&self.attestation_certificate);
        registration_data.extend_from_slice(signature.to_der().as_bytes());

        self.credentials.push(VirtualCredential {
            key_handle,
            application_parameter,
            signing_key,
        });

        Ok(RegisterResponse {
            registration_data: b64url_encode(&registration_data),
            client_data: b64url_encode(&client_data),
        })
    }

    /// Sign the challenge with the next counter value.
    pub fn handle_sign_request(
        &mut self,
        request: &SignRequestMessage,
    ) -> Result<SignResponse, VirtualKeyError> {
        let counter = self.counter.wrapping_add(1);
        self.sign_with_counter(request, counter)
    }

    /// Sign the challenge with an explicit counter value, which also becomes
    /// the token's current counter.
    pub fn sign_with_counter(
        &mut self,
        request: &SignRequestMessage,
        counter: u32,
    ) -> Result<SignResponse, VirtualKeyError> {
        let application_parameter = sha256(request.application_id.as_bytes());

        let mut found = None;
        for registered in &request.registered_credentials {
            let key_handle = b64url_decode("key_handle", &registered.key_handle)
                .map_err(|e| VirtualKeyError::Request(e.to_string()))?;
            if let Some(credential) = self.credentials.iter().find(|credential| {
                credential.key_handle == key_handle
                    && credential.application_parameter == application_parameter
            }) {
                found = Some(credential);
                break;
            }
        }
        let credential = found.ok_or(VirtualKeyError::NoMatchingCredential)?;

        let client_data = self.client_data(TYP_AUTHENTICATION, &request.challenge, &request.application_id)?;

        let mut signed = Vec::with_capacity(69);
        signed.extend_from_slice(&application_parameter);
        signed.push(USER_PRESENCE_FLAG);
        signed.extend_from_slice(&counter.to_be_bytes());
        signed.extend_from_slice(&sha256(&client_data));
        let signature: Signature = credential.signing_key.sign(&signed);

        let mut signature_data = vec![USER_PRESENCE_FLAG];
        signature_data.extend_from_slice(&counter.to_be_bytes());
        signature_data.extend_from_slice(signature.to_der().as_bytes());

        let key_handle = b64url_encode(&credential.key_handle);
        self.counter = counter;

        Ok(SignResponse {
            key_handle,
            signature_data: b64url_encode(&signature_data),
            client_data: b64url_encode(&client_data),
        })
    }

    fn owns(&self, key_handle: &[u8], application_parameter: &[u8; 32]) -> bool {
        self.credentials.iter().any(|credential| {
            credential.key_handle == key_handle
                && &credential.application_parameter == application_parameter
        })
    }

    fn client_data(&self, typ: &str, challenge: &str, application_id: &str) -> Result<Vec<u8>, VirtualKeyError> {
        let client_data = ClientData {
            typ: typ.to_string(),
            challenge: challenge.to_string(),
            origin: self
                .origin
                .clone()
                .unwrap_or_else(|| application_id.to_string()),
            cid_pubkey: None,
        };
        serde_json::to_vec(&client_data).map_err(|e| VirtualKeyError::Request(e.to_string()))
    }
}

impl std::fmt::Debug for VirtualKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualKey")
            .field("credentials", &self.credentials.len())
            .field("counter", &self.counter)
            .field("origin", &self.origin)
            .finish()
    }
}

fn generate_key_pair() -> Result<KeyPair, VirtualKeyError> {
    KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| VirtualKeyError::Certificate(e.to_string()))
}

fn certificate_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{RegisteredKey, RegistrationChallenge};

    fn register_request(registered: Vec<RegisteredKey>) -> RegisterRequestMessage {
        RegisterRequestMessage {
            application_id: "https://example.test".to_string(),
            registration_challenges: vec![RegistrationChallenge {
                version: "U2F_V2".to_string(),
                challenge: "bm9uY2U".to_string(),
            }],
            registered_credentials: registered,
        }
    }

    #[test]
    fn test_refuses_duplicate_registration() {
        let mut key = VirtualKey::new().unwrap();
        key.handle_register_request(&register_request(Vec::new()))
            .unwrap();

        let registered = key
            .key_handles()
            .iter()
            .map(|kh| RegisteredKey::new(b64url_encode(kh)))
            .collect();
        let result = key.handle_register_request(&register_request(registered));
        assert!(matches!(result, Err(VirtualKeyError::AlreadyRegistered)));
    }

    #[test]
    fn test_sign_increments_counter() {
        let mut key = VirtualKey::new().unwrap();
        key.handle_register_request(&register_request(Vec::new()))
            .unwrap();
        let request = SignRequestMessage {
            application_id: "https://example.test".to_string(),
            challenge: "bm9uY2U".to_string(),
            registered_credentials: vec![RegisteredKey::new(b64url_encode(&key.key_handles()[0]))],
        };

        key.handle_sign_request(&request).unwrap();
        key.handle_sign_request(&request).unwrap();
        assert_eq!(key.counter(), 2);
    }

    #[test]
    fn test_sign_requires_known_credential() {
        let mut key = VirtualKey::new().unwrap();
        let request = SignRequestMessage {
            application_id: "https://example.test".to_string(),
            challenge: "bm9uY2U".to_string(),
            registered_credentials: vec![RegisteredKey::new("AAAA".to_string())],
        };
        assert!(matches!(
            key.handle_sign_request(&request),
            Err(VirtualKeyError::NoMatchingCredential)
        ));
    }
}
