//! U2F Auth - device authentication backend built on `u2f-core`
//!
//! Stores devices and roles in a pluggable key-value [`Storage`], runs the
//! registration and login flows under per-device locks, and maps an
//! authenticated device to an [`AuthGrant`] through its role.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use u2f_auth::{Config, MemoryStorage, U2fBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = U2fBackend::new(Config::from_env()?, Arc::new(MemoryStorage::new()))?;
//!
//! // Hand this to the browser, which passes it to the token.
//! let request = backend.registration_request("yubikey").await?;
//! println!("{}", serde_json::to_string(&request)?);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod fields;
pub mod grant;
pub mod registry;
pub mod roles;
pub mod storage;

pub use backend::{CredentialInfo, DeviceInfo, U2fBackend};
pub use config::{Config, ConfigError};
pub use error::{AuthError, AUTHENTICATION_FAILED};
pub use fields::{DeviceField, FieldError, RoleField};
pub use grant::{AuthGrant, Grant, GrantResolver};
pub use registry::{DeviceGuard, DeviceLocks, DeviceRegistry};
pub use roles::{RoleRecord, RoleSource, StorageRoleStore};
pub use storage::{MemoryStorage, Storage, StorageError};
