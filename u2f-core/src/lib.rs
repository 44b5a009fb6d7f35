//! U2F Core - FIDO U2F challenge-response protocol engine
//!
//! This crate implements the relying-party half of U2F: issuing
//! challenges and verifying what a hardware token sends back. It performs no
//! I/O; callers load a [`DeviceRecord`], run a verifier on it and store it
//! again.
//!
//! # Features
//!
//! - 256-bit challenge nonces from the OS CSPRNG, single-use and optionally
//!   time-limited
//! - Registration verification (P-256 attestation signature, optional
//!   attestation roots)
//! - Authentication verification with a strictly increasing counter for
//!   replay and clone detection
//! - A software token ([`VirtualKey`]) for tests and demos
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use u2f_core::{authenticate, register, ChallengeEngine, DeviceRecord, VerificationPolicy, VirtualKey};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app_id = "https://example.test";
//! let facets = vec![app_id.to_string()];
//! let policy = VerificationPolicy::default();
//! let engine = ChallengeEngine::new();
//! let mut token = VirtualKey::new()?;
//!
//! let mut record = DeviceRecord::new("token1").ok_or("empty name")?;
//! let (challenge, request) = engine.registration_challenge(app_id, &facets, &record.credentials)?;
//! record.install_challenge(challenge)?;
//! register(&mut record, &token.handle_register_request(&request)?, &policy, Utc::now())?;
//!
//! let (challenge, request) = engine.authentication_challenge(app_id, &facets, &record.credentials)?;
//! record.install_challenge(challenge)?;
//! let verified = authenticate(&mut record, &token.handle_sign_request(&request)?, &policy, Utc::now())?;
//! assert_eq!(verified.counter, 1);
//! # Ok(())
//! # }
//! ```

pub mod authentication;
pub mod challenge;
pub mod client_data;
pub mod device;
pub mod encoding;
pub mod error;
pub mod messages;
pub mod policy;
pub mod registration;

#[cfg(feature = "virtual-key")]
pub mod virtual_key;

// Re-export main types for convenience
pub use authentication::{authenticate, SignatureData, VerifiedCredential};
pub use challenge::{Challenge, ChallengeEngine, ChallengeKind, NonceSource, OsNonceSource, NONCE_LEN};
pub use client_data::{ClientData, SignedClientData};
pub use device::{normalize_device_name, Credential, DeviceRecord};
pub use error::{ProtocolError, Result, U2F_VERSION};
pub use messages::{
    RegisterRequestMessage, RegisterResponse, RegisteredKey, RegistrationChallenge,
    SignRequestMessage, SignResponse,
};
pub use policy::{VerificationPolicy, DEFAULT_CHALLENGE_TTL_SECS};
pub use registration::{register, RegistrationData};

#[cfg(feature = "virtual-key")]
pub use virtual_key::{AttestationAuthority, VirtualKey, VirtualKeyError};
