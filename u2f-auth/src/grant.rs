//! Grant resolution
//!
//! Maps a device's role name to the access it receives. Resolution is a pure
//! lookup against the current role set: there is no default grant, and an
//! empty or unknown role name fails with [`AuthError::RoleNotFound`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::roles::{RoleRecord, RoleSource};

/// Access granted by a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub policies: Vec<String>,
    /// Seconds
    pub ttl: u64,
    /// Seconds
    pub max_ttl: u64,
}

impl From<RoleRecord> for Grant {
    fn from(role: RoleRecord) -> Self {
        Self {
            policies: role.policies,
            ttl: role.token_ttl,
            max_ttl: role.token_max_ttl,
        }
    }
}

/// Result of a successful login or renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGrant {
    pub device_name: String,
    /// `u2f_<device name>`
    pub display_name: String,
    /// Stable identity of the device for the host's entity mapping
    pub alias: String,
    pub metadata: BTreeMap<String, String>,
    pub policies: Vec<String>,
    /// Seconds
    pub ttl: u64,
    /// Seconds
    pub max_ttl: u64,
}

impl AuthGrant {
    pub fn new(device_name: &str, grant: Grant) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("device_name".to_string(), device_name.to_string());

        Self {
            device_name: device_name.to_string(),
            display_name: format!("u2f_{device_name}"),
            alias: device_name.to_string(),
            metadata,
            policies: grant.policies,
            ttl: grant.ttl,
            max_ttl: grant.max_ttl,
        }
    }
}

/// Resolves role names against a [`RoleSource`].
#[derive(Clone)]
pub struct GrantResolver {
    roles: Arc<dyn RoleSource>,
}

impl GrantResolver {
    pub fn new(roles: Arc<dyn RoleSource>) -> Self {
        Self { roles }
    }

    pub async fn resolve(&self, role_name: &str) -> Result<Grant, AuthError> {
        let name = role_name.trim().to_lowercase();
        if name.is_empty() {
            return Err(AuthError::RoleNotFound(name));
        }

        match self.roles.role(&name).await? {
            Some(role) => Ok(Grant::from(role)),
            None => Err(AuthError::RoleNotFound(name)),
        }
    }
}

impl std::fmt::Debug for GrantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantResolver")
            .field("roles", &"<dyn RoleSource>")
            .finish()
    }
}
