//! Base64url helpers for the U2F wire format.
//!
//! U2F messages carry binary fields as unpadded base64url. Some browsers and
//! tokens still emit padding, so decoding accepts both.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::{ProtocolError, Result};

/// Encode bytes as unpadded base64url.
pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, with or without padding.
pub fn b64url_decode(field: &str, value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    let decoded = if trimmed.ends_with('=') {
        URL_SAFE.decode(trimmed)
    } else {
        URL_SAFE_NO_PAD.decode(trimmed)
    };
    decoded.map_err(|e| ProtocolError::MalformedResponse(format!("{field}: {e}")))
}

/// Serde adapter storing `Vec<u8>` as base64url text.
pub mod b64url {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::b64url_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::b64url_decode("value", &text).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Vec<u8>>` stored as base64url text.
pub mod b64url_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&super::b64url_encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| super::b64url_decode("value", &text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_padding() {
        let padded = URL_SAFE.encode([0xfb, 0xff]);
        assert!(padded.ends_with('='));
        assert_eq!(b64url_decode("x", &padded).unwrap(), vec![0xfb, 0xff]);
        assert_eq!(b64url_decode("x", "-_8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_decode_rejects_standard_alphabet() {
        let err = b64url_decode("registration_data", "+/8").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResponse(msg) if msg.starts_with("registration_data")));
    }
}
