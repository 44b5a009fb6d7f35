//! Role storage
//!
//! A role names the policies and token lifetimes a device receives after a
//! successful authentication. Roles are stored as JSON under `roles/<name>`.
//!
//! Deleting a role does not revoke grants issued under it; it only makes
//! further authentications and renewals of its devices fail.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::fields::{normalize_policies, parse_all, RoleField};
use crate::storage::{get_json, put_json, Storage, StorageError};

const ROLE_PREFIX: &str = "roles/";

fn role_key(name: &str) -> String {
    format!("{ROLE_PREFIX}{name}")
}

/// Stored role attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Sorted, de-duplicated, lower-cased
    #[serde(default)]
    pub policies: Vec<String>,
    /// Token lifetime in seconds (0 = host default)
    #[serde(default)]
    pub token_ttl: u64,
    /// Upper bound for renewals in seconds (0 = host default)
    #[serde(default)]
    pub token_max_ttl: u64,
}

impl RoleRecord {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.token_max_ttl != 0 && self.token_ttl > self.token_max_ttl {
            return Err(AuthError::invalid_request(
                "token_ttl cannot be greater than token_max_ttl",
            ));
        }
        Ok(())
    }
}

/// Where the grant resolver looks roles up.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// Fetch a role by normalized name.
    async fn role(&self, name: &str) -> Result<Option<RoleRecord>, StorageError>;
}

/// Roles kept in the backend's own [`Storage`].
pub struct StorageRoleStore {
    storage: Arc<dyn Storage>,
    /// Serializes role read-modify-write cycles
    write_lock: Mutex<()>,
}

impl StorageRoleStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Read a role. Names are case-insensitive.
    pub async fn read_role(&self, name: &str) -> Result<Option<RoleRecord>, AuthError> {
        let name = role_name(name)?;
        Ok(get_json(self.storage.as_ref(), &role_key(&name)).await?)
    }

    /// Create or update a role from a write request.
    ///
    /// Creating a role requires `policies` (or `token_policies`).
    pub async fn write_role(
        &self,
        name: &str,
        fields: &Map<String, Value>,
    ) -> Result<RoleRecord, AuthError> {
        let name = role_name(name)?;
        let updates = parse_all(fields, RoleField::parse)?;

        let _guard = self.write_lock.lock().await;
        let existing: Option<RoleRecord> = get_json(self.storage.as_ref(), &role_key(&name)).await?;

        let creating = existing.is_none();
        if creating
            && !updates
                .iter()
                .any(|field| matches!(field, RoleField::Policies(_)))
        {
            return Err(AuthError::invalid_request("missing token_policies"));
        }

        let mut role = existing.unwrap_or_default();
        for update in updates {
            update.apply(&mut role);
        }
        role.policies = normalize_policies(&role.policies);
        role.validate()?;

        put_json(self.storage.as_ref(), &role_key(&name), &role).await?;
        tracing::info!(
            role = %name,
            created = creating,
            policies = ?role.policies,
            "Role written"
        );
        Ok(role)
    }

    pub async fn delete_role(&self, name: &str) -> Result<(), AuthError> {
        let name = role_name(name)?;
        let _guard = self.write_lock.lock().await;
        self.storage.delete(&role_key(&name)).await?;
        tracing::info!(role = %name, "Role deleted");
        Ok(())
    }

    pub async fn list_roles(&self) -> Result<Vec<String>, AuthError> {
        Ok(self.storage.list(ROLE_PREFIX).await?)
    }
}

#[async_trait]
impl RoleSource for StorageRoleStore {
    async fn role(&self, name: &str) -> Result<Option<RoleRecord>, StorageError> {
        get_json(self.storage.as_ref(), &role_key(name)).await
    }
}

impl std::fmt::Debug for StorageRoleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRoleStore")
            .field("storage", &"<dyn Storage>")
            .finish()
    }
}

fn role_name(raw: &str) -> Result<String, AuthError> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(AuthError::invalid_request("missing role name"));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn store() -> StorageRoleStore {
        StorageRoleStore::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_create_requires_policies() {
        let roles = store();
        let err = roles
            .write_role("ops", &fields(json!({ "ttl": 60 })))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
        assert!(roles.read_role("ops").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let roles = store();
        roles
            .write_role(
                "Ops",
                &fields(json!({ "token_policies": "Dev,ops", "ttl": "5m", "max_ttl": "1h" })),
            )
            .await
            .unwrap();

        // Updates only touch the named fields.
        let role = roles
            .write_role("ops", &fields(json!({ "token_ttl": 120 })))
            .await
            .unwrap();
        assert_eq!(role.policies, vec!["dev", "ops"]);
        assert_eq!(role.token_ttl, 120);
        assert_eq!(role.token_max_ttl, 3600);

        assert_eq!(roles.read_role("OPS").await.unwrap(), Some(role));
        assert_eq!(roles.list_roles().await.unwrap(), vec!["ops"]);
    }

    #[tokio::test]
    async fn test_ttl_cannot_exceed_max_ttl() {
        let roles = store();
        let err = roles
            .write_role(
                "ops",
                &fields(json!({ "policies": ["dev"], "ttl": 600, "max_ttl": 60 })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_delete_role() {
        let roles = store();
        roles
            .write_role("ops", &fields(json!({ "policies": "dev" })))
            .await
            .unwrap();
        roles.delete_role("ops").await.unwrap();
        assert!(roles.role("ops").await.unwrap().is_none());
        assert!(roles.list_roles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_field_is_rejected() {
        let roles = store();
        let err = roles
            .write_role("ops", &fields(json!({ "policies": "dev", "bound_cidrs": "10.0.0.0/8" })))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }
}
