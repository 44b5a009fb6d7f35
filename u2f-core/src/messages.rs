//! JSON request/response messages exchanged with the U2F client.
//!
//! Binary fields travel as unpadded base64url strings exactly as the token
//! produced them; they are decoded by the verifiers, not at deserialization,
//! so a malformed field surfaces as a protocol error instead of a serde one.

use serde::{Deserialize, Serialize};

use crate::error::U2F_VERSION;

/// Registration challenge handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequestMessage {
    /// Relying party the registration is bound to
    pub application_id: String,
    /// Challenges the token may answer (always exactly one)
    pub registration_challenges: Vec<RegistrationChallenge>,
    /// Credentials the device already holds, so the token can refuse to
    /// register twice
    pub registered_credentials: Vec<RegisteredKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationChallenge {
    pub version: String,
    /// Base64url nonce
    pub challenge: String,
}

/// Reference to an already registered credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredKey {
    pub version: String,
    /// Base64url key handle
    pub key_handle: String,
}

impl RegisteredKey {
    pub fn new(key_handle: String) -> Self {
        Self {
            version: U2F_VERSION.to_string(),
            key_handle,
        }
    }
}

/// Authentication challenge handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequestMessage {
    pub application_id: String,
    /// Base64url nonce
    pub challenge: String,
    pub registered_credentials: Vec<RegisteredKey>,
}

/// Token answer to a registration challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Base64url raw registration message
    pub registration_data: String,
    /// Base64url client data JSON
    pub client_data: String,
}

/// Token answer to an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    /// Base64url key handle of the credential that signed
    pub key_handle: String,
    /// Base64url raw signature message
    pub signature_data: String,
    /// Base64url client data JSON
    pub client_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_shape() {
        let message = RegisterRequestMessage {
            application_id: "https://example.test".to_string(),
            registration_challenges: vec![RegistrationChallenge {
                version: U2F_VERSION.to_string(),
                challenge: "abc".to_string(),
            }],
            registered_credentials: vec![RegisteredKey::new("kh".to_string())],
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["application_id"], "https://example.test");
        assert_eq!(json["registration_challenges"][0]["version"], "U2F_V2");
        assert_eq!(json["registration_challenges"][0]["challenge"], "abc");
        assert_eq!(json["registered_credentials"][0]["key_handle"], "kh");
    }

    #[test]
    fn test_sign_response_parses_from_client_json() {
        let json = r#"{"key_handle":"a","signature_data":"b","client_data":"c"}"#;
        let response: SignResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.key_handle, "a");
        assert_eq!(response.signature_data, "b");
        assert_eq!(response.client_data, "c");
    }
}
