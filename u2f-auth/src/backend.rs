//! U2F authentication backend
//!
//! Orchestrates the protocol flows on top of the device registry:
//! - **Registration**: `registration_request` issues a challenge (creating the
//!   device if needed), `registration_response` verifies the token's answer
//!   and appends a credential.
//! - **Login**: `sign_request` issues a challenge to a registered device,
//!   `sign_response` verifies the signature and returns an [`AuthGrant`].
//! - **Renewal**: `renew` re-resolves the grant of an issued token.
//! - **Management**: device read/list/write/delete and challenge sweeping.
//!
//! Every read-modify-write of a device record runs under that device's lock,
//! so at most one verification can consume a given challenge.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use u2f_core::{
    authenticate, register, ChallengeEngine, ChallengeKind, DeviceRecord, NonceSource,
    ProtocolError, RegisterRequestMessage, RegisterResponse, SignRequestMessage, SignResponse,
    VerificationPolicy,
};

use crate::config::{Config, ConfigError};
use crate::error::AuthError;
use crate::fields::{equivalent_policies, parse_all, DeviceField};
use crate::grant::{AuthGrant, GrantResolver};
use crate::registry::{device_alias, DeviceLocks, DeviceRegistry};
use crate::roles::{RoleSource, StorageRoleStore};
use crate::storage::Storage;

/// Public view of a device record. Key material and nonces are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub role_name: String,
    pub credentials: Vec<CredentialInfo>,
    /// Kind of the outstanding challenge, if any
    pub pending_challenge: Option<ChallengeKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialInfo {
    /// Base64url key handle
    pub key_handle: String,
    pub counter: u32,
}

impl From<&DeviceRecord> for DeviceInfo {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            name: record.name.clone(),
            role_name: record.role_name.clone(),
            credentials: record
                .credentials
                .iter()
                .map(|credential| CredentialInfo {
                    key_handle: credential.registered_key().key_handle,
                    counter: credential.counter,
                })
                .collect(),
            pending_challenge: record
                .pending_challenge
                .as_ref()
                .map(|challenge| challenge.kind),
        }
    }
}

pub struct U2fBackend {
    config: Config,
    policy: VerificationPolicy,
    engine: ChallengeEngine,
    registry: DeviceRegistry,
    locks: DeviceLocks,
    roles: StorageRoleStore,
    grants: GrantResolver,
}

impl U2fBackend {
    /// Backend whose roles live in the same storage as its devices.
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Result<Self, ConfigError> {
        let roles = Arc::new(StorageRoleStore::new(Arc::clone(&storage)));
        Self::with_role_source(config, storage, roles)
    }

    /// Backend resolving grants against an external role source. Role
    /// management through [`Self::roles`] still writes to `storage`.
    pub fn with_role_source(
        config: Config,
        storage: Arc<dyn Storage>,
        role_source: Arc<dyn RoleSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if !config.require_attestation {
            tracing::warn!(
                app_id = %config.app_id,
                "Attestation verification disabled - any well-formed registration will be accepted"
            );
        }

        tracing::info!(
            app_id = %config.app_id,
            trusted_facets = ?config.trusted_facets,
            attestation_roots = config.attestation_roots.len(),
            challenge_ttl_secs = config.challenge_ttl_secs,
            "U2F backend initialized"
        );

        Ok(Self {
            policy: config.policy(),
            config,
            engine: ChallengeEngine::new(),
            registry: DeviceRegistry::new(Arc::clone(&storage)),
            locks: DeviceLocks::new(),
            roles: StorageRoleStore::new(storage),
            grants: GrantResolver::new(role_source),
        })
    }

    /// Replace the challenge nonce source.
    pub fn with_nonce_source(mut self, source: impl NonceSource + 'static) -> Self {
        self.engine = ChallengeEngine::with_source(source);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Role management.
    pub fn roles(&self) -> &StorageRoleStore {
        &self.roles
    }

    // ==================== Registration ====================

    /// Issue a registration challenge, creating the device if it does not
    /// exist yet.
    pub async fn registration_request(
        &self,
        name: &str,
    ) -> Result<RegisterRequestMessage, AuthError> {
        let name = normalized_name(name)?;
        self.registration_request_inner(&name)
            .await
            .inspect_err(|e| e.log("registration_request", &name))
    }

    async fn registration_request_inner(
        &self,
        name: &str,
    ) -> Result<RegisterRequestMessage, AuthError> {
        let _guard = self.locks.lock(name).await;

        let mut record = match self.registry.get(name).await? {
            Some(record) => record,
            None => {
                tracing::info!(device = %name, "Creating device");
                DeviceRecord::new(name)
                    .ok_or_else(|| AuthError::invalid_request("missing device name"))?
            }
        };

        let (challenge, request) = self.engine.registration_challenge(
            &self.config.app_id,
            &self.config.trusted_facets,
            &record.credentials,
        )?;
        record.install_challenge(challenge)?;
        self.registry.put(&record).await?;

        tracing::info!(
            device = %name,
            credentials = record.credentials.len(),
            "Registration challenge issued"
        );
        Ok(request)
    }

    /// Verify a registration response and store the new credential.
    pub async fn registration_response(
        &self,
        name: &str,
        response: &RegisterResponse,
    ) -> Result<DeviceInfo, AuthError> {
        let name = normalized_name(name)?;
        self.registration_response_inner(&name, response)
            .await
            .inspect_err(|e| e.log("registration_response", &name))
    }

    async fn registration_response_inner(
        &self,
        name: &str,
        response: &RegisterResponse,
    ) -> Result<DeviceInfo, AuthError> {
        let _guard = self.locks.lock(name).await;

        let mut record = self
            .registry
            .get(name)
            .await?
            .ok_or(ProtocolError::NotRegistered)?;

        let outcome = register(&mut record, response, &self.policy, Utc::now());
        self.persist_attempt(&record, &outcome).await?;
        let credential = outcome?;

        tracing::info!(
            device = %name,
            credentials = record.credentials.len(),
            attested = credential.attestation_certificate.is_some() && self.policy.require_attestation,
            "Device registered"
        );
        Ok(DeviceInfo::from(&record))
    }

    // ==================== Login ====================

    /// Issue an authentication challenge to a registered device.
    pub async fn sign_request(&self, name: &str) -> Result<SignRequestMessage, AuthError> {
        let name = normalized_name(name)?;
        self.sign_request_inner(&name)
            .await
            .inspect_err(|e| e.log("sign_request", &name))
    }

    async fn sign_request_inner(&self, name: &str) -> Result<SignRequestMessage, AuthError> {
        let _guard = self.locks.lock(name).await;

        let mut record = self
            .registry
            .get(name)
            .await?
            .filter(DeviceRecord::is_registered)
            .ok_or(ProtocolError::NotRegistered)?;

        let (challenge, request) = self.engine.authentication_challenge(
            &self.config.app_id,
            &self.config.trusted_facets,
            &record.credentials,
        )?;
        record.install_challenge(challenge)?;
        self.registry.put(&record).await?;

        tracing::info!(device = %name, "Authentication challenge issued");
        Ok(request)
    }

    /// Verify a signed challenge and resolve the device's grant.
    pub async fn sign_response(
        &self,
        name: &str,
        response: &SignResponse,
    ) -> Result<AuthGrant, AuthError> {
        let name = normalized_name(name)?;
        self.sign_response_inner(&name, response)
            .await
            .inspect_err(|e| e.log("sign_response", &name))
    }

    async fn sign_response_inner(
        &self,
        name: &str,
        response: &SignResponse,
    ) -> Result<AuthGrant, AuthError> {
        let _guard = self.locks.lock(name).await;

        let mut record = self
            .registry
            .get(name)
            .await?
            .ok_or(ProtocolError::NotRegistered)?;

        let outcome = authenticate(&mut record, response, &self.policy, Utc::now());
        self.persist_attempt(&record, &outcome).await?;
        let verified = outcome?;

        let grant = self.grants.resolve(&record.role_name).await?;

        tracing::info!(
            device = %name,
            counter = verified.counter,
            role = %record.role_name,
            "Device authenticated"
        );
        Ok(AuthGrant::new(&record.name, grant))
    }

    // ==================== Renewal ====================

    /// Re-resolve the grant of a token issued to `device_name`.
    ///
    /// Fails with `NotRegistered` when the device is gone and with
    /// `PoliciesChanged` when its role now grants different policies than
    /// `current_policies`.
    pub async fn renew(
        &self,
        device_name: &str,
        current_policies: &[String],
    ) -> Result<AuthGrant, AuthError> {
        let name = normalized_name(device_name)?;
        self.renew_inner(&name, current_policies)
            .await
            .inspect_err(|e| e.log("renew", &name))
    }

    async fn renew_inner(
        &self,
        name: &str,
        current_policies: &[String],
    ) -> Result<AuthGrant, AuthError> {
        let record = self
            .registry
            .get(name)
            .await?
            .filter(DeviceRecord::is_registered)
            .ok_or(ProtocolError::NotRegistered)?;

        let grant = self.grants.resolve(&record.role_name).await?;
        if !equivalent_policies(&grant.policies, current_policies) {
            return Err(AuthError::PoliciesChanged);
        }

        tracing::info!(device = %name, "Grant renewed");
        Ok(AuthGrant::new(&record.name, grant))
    }

    /// Alias a login for `name` would carry, without touching storage.
    pub fn alias_for(&self, name: &str) -> Result<String, AuthError> {
        device_alias(name).ok_or_else(|| AuthError::invalid_request("missing device name"))
    }

    // ==================== Device management ====================

    pub async fn read_device(&self, name: &str) -> Result<Option<DeviceInfo>, AuthError> {
        let name = normalized_name(name)?;
        let record = self.registry.get(&name).await?;
        Ok(record.as_ref().map(DeviceInfo::from))
    }

    pub async fn list_devices(&self) -> Result<Vec<String>, AuthError> {
        Ok(self.registry.list().await?)
    }

    /// Create or update a device from a write request (currently only
    /// `role_name`).
    pub async fn write_device(
        &self,
        name: &str,
        fields: &Map<String, Value>,
    ) -> Result<DeviceInfo, AuthError> {
        let name = normalized_name(name)?;
        let updates = parse_all(fields, DeviceField::parse)?;

        let _guard = self.locks.lock(&name).await;
        let mut record = match self.registry.get(&name).await? {
            Some(record) => record,
            None => DeviceRecord::new(&name)
                .ok_or_else(|| AuthError::invalid_request("missing device name"))?,
        };
        for update in updates {
            update.apply(&mut record);
        }
        self.registry.put(&record).await?;

        tracing::info!(device = %name, role = %record.role_name, "Device written");
        Ok(DeviceInfo::from(&record))
    }

    /// Delete a device and all of its credentials. Deleting a missing device
    /// is not an error.
    pub async fn delete_device(&self, name: &str) -> Result<(), AuthError> {
        let name = normalized_name(name)?;
        let _guard = self.locks.lock(&name).await;
        self.registry.delete(&name).await?;
        tracing::info!(device = %name, "Device deleted");
        Ok(())
    }

    /// Drop every outstanding challenge older than the configured lifetime.
    /// Returns how many were removed.
    pub async fn sweep_expired_challenges(&self) -> Result<usize, AuthError> {
        let now = Utc::now();
        let mut swept = 0;

        for name in self.registry.list().await? {
            let _guard = self.locks.lock(&name).await;
            let Some(mut record) = self.registry.get(&name).await? else {
                continue;
            };
            if record.clear_expired_challenge(&self.policy, now) {
                self.registry.put(&record).await?;
                swept += 1;
            }
        }

        if swept > 0 {
            tracing::info!(swept, "Expired challenges removed");
        }
        Ok(swept)
    }

    /// Store the record after a verification attempt.
    ///
    /// Every outcome except `NotRegistered` took the challenge off the
    /// record, so it must be written back whether the attempt succeeded or
    /// not. A write failure wins over the verification result.
    async fn persist_attempt<T>(
        &self,
        record: &DeviceRecord,
        outcome: &Result<T, ProtocolError>,
    ) -> Result<(), AuthError> {
        if matches!(outcome, Err(ProtocolError::NotRegistered)) {
            return Ok(());
        }
        self.registry.put(record).await?;
        Ok(())
    }
}

impl std::fmt::Debug for U2fBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("U2fBackend")
            .field("config", &self.config)
            .field("locks", &self.locks)
            .finish()
    }
}

fn normalized_name(raw: &str) -> Result<String, AuthError> {
    device_alias(raw).ok_or_else(|| AuthError::invalid_request("missing device name"))
}
