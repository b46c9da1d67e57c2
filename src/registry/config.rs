//! On-disk format of the endpoint registry.
//!
//! The file is read once at process start. Secrets are kept as the encrypted
//! base64 text; decryption happens later, per token acquisition.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::{EnvironmentType, RegistryError};

/// Top-level registry file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    pub environments: HashMap<EnvironmentType, EnvironmentConfig>,
    pub endpoints: Vec<EndpointConfig>,
    /// Group name to member principal names, consumed by the static group resolver
    #[serde(default)]
    pub group_memberships: HashMap<String, Vec<String>>,
}

/// Per-environment upstream settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    pub upstream_url: String,
    pub token_resource: String,
    /// Tenant id or friendly name used when a request names no tenant
    #[serde(default)]
    pub default_tenant: Option<String>,
}

/// One configured tenant
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub tenant_id: String,
    #[serde(default)]
    pub tenant_friendly_name: Option<String>,
    pub environment: EnvironmentType,
    pub client_id: String,
    /// base64 of nonce || ciphertext, sealed with `secret_key_id`
    pub client_secret: String,
    pub secret_key_id: String,
    pub read_only_group: String,
    pub read_write_group: String,
}

impl RegistryConfig {
    /// Read and parse the registry file
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: RegistryConfig = serde_json::from_str(&raw)?;
        info!(
            path = %path.display(),
            endpoints = config.endpoints.len(),
            environments = config.environments.len(),
            "Loaded endpoint registry file"
        );

        Ok(config)
    }
}
