//! # Endpoint Registry Module
//!
//! Process-wide table of the upstream tenants this proxy can act for. The
//! table is built once at startup from the registry file and is immutable
//! afterwards, with one exception: each `EndpointInfo` carries its most recent
//! bearer token, which the token cache replaces as a whole value while holding
//! that tenant's lock.
//!
//! ## Tenant Selection
//!
//! Callers pick a tenant with request headers:
//! - `UseINT`: `true` selects the internal environment, otherwise production
//! - `TenantId`: explicit tenant id, wins over `TenantName`
//! - `TenantName`: tenant friendly name
//!
//! With neither tenant header, the environment's `default_tenant` is used.
//!
//! ## Sub-modules
//!
//! - `config`: serde model of the registry file

pub mod config;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::types::AccessToken;
use crate::errors::ProxyError;
use crate::security::{EncryptedSecret, SecretError, SecretKeyRing};
use config::RegistryConfig;

/// Header selecting the internal environment
pub const USE_INT_HEADER: &str = "useint";
/// Header naming a tenant by id
pub const TENANT_ID_HEADER: &str = "tenantid";
/// Header naming a tenant by friendly name
pub const TENANT_NAME_HEADER: &str = "tenantname";

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Upstream environment a tenant lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    Production,
    Internal,
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentType::Production => write!(f, "production"),
            EnvironmentType::Internal => write!(f, "internal"),
        }
    }
}

/// Errors raised while building the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse registry file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tenant {tenant_id}: field '{field}' must not be empty")]
    EmptyField { tenant_id: String, field: &'static str },

    #[error("duplicate tenant id {0}")]
    DuplicateTenant(String),

    #[error("duplicate tenant friendly name {0}")]
    DuplicateFriendlyName(String),

    #[error("tenant {tenant_id} uses environment {environment}, which has no settings")]
    MissingEnvironment {
        tenant_id: String,
        environment: EnvironmentType,
    },

    #[error("tenant {tenant_id}: secret key '{key_id}' is not in the key ring")]
    UnknownSecretKey { tenant_id: String, key_id: String },

    #[error("tenant {tenant_id}: invalid client secret: {source}")]
    InvalidSecret {
        tenant_id: String,
        source: SecretError,
    },

    #[error("default tenant '{tenant}' for {environment} does not match any endpoint")]
    UnknownDefaultTenant {
        environment: EnvironmentType,
        tenant: String,
    },

    #[error("default tenant '{tenant}' for {environment} belongs to another environment")]
    DefaultTenantEnvironmentMismatch {
        environment: EnvironmentType,
        tenant: String,
    },
}

/// Upstream settings shared by every tenant of one environment
#[derive(Debug, Clone)]
pub struct EnvironmentSettings {
    pub upstream_url: String,
    pub token_resource: String,
}

/// One configured upstream tenant
pub struct EndpointInfo {
    pub tenant_id: String,
    pub tenant_friendly_name: Option<String>,
    pub environment: EnvironmentType,
    pub client_id: String,
    pub client_secret: EncryptedSecret,
    pub read_only_group: String,
    pub read_write_group: String,
    cached_token: RwLock<Option<AccessToken>>,
}

impl EndpointInfo {
    pub fn new(
        tenant_id: String,
        tenant_friendly_name: Option<String>,
        environment: EnvironmentType,
        client_id: String,
        client_secret: EncryptedSecret,
        read_only_group: String,
        read_write_group: String,
    ) -> Self {
        Self {
            tenant_id,
            tenant_friendly_name,
            environment,
            client_id,
            client_secret,
            read_only_group,
            read_write_group,
            cached_token: RwLock::new(None),
        }
    }

    /// Snapshot of the cached token, whatever its expiry
    pub fn cached_token(&self) -> Option<AccessToken> {
        self.cached_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the cached token as one value. Callers hold the tenant's `AsyncMutex`.
    pub fn publish_token(&self, token: AccessToken) {
        *self
            .cached_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Name used in log lines and error messages
    pub fn display_name(&self) -> &str {
        self.tenant_friendly_name.as_deref().unwrap_or(&self.tenant_id)
    }
}

impl fmt::Debug for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointInfo")
            .field("tenant_id", &self.tenant_id)
            .field("tenant_friendly_name", &self.tenant_friendly_name)
            .field("environment", &self.environment)
            .field("client_id", &self.client_id)
            .field("read_only_group", &self.read_only_group)
            .field("read_write_group", &self.read_write_group)
            .finish_non_exhaustive()
    }
}

/// Which tenant an inbound request asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantRef {
    Id(String),
    Name(String),
}

/// Tenant choice derived from the tenant-selection headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSelector {
    pub environment: EnvironmentType,
    pub tenant: Option<TenantRef>,
}

impl TenantSelector {
    pub fn production_default() -> Self {
        Self {
            environment: EnvironmentType::Production,
            tenant: None,
        }
    }

    /// Read `UseINT`, `TenantId` and `TenantName`
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ProxyError> {
        let use_int = match header_text(headers, USE_INT_HEADER)? {
            None => false,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(ProxyError::InvalidRequest(format!(
                        "UseINT header must be true or false, got '{}'",
                        other
                    )));
                }
            },
        };

        let environment = if use_int {
            EnvironmentType::Internal
        } else {
            EnvironmentType::Production
        };

        let tenant = match header_text(headers, TENANT_ID_HEADER)? {
            Some(id) => Some(TenantRef::Id(id)),
            None => header_text(headers, TENANT_NAME_HEADER)?.map(TenantRef::Name),
        };

        Ok(Self { environment, tenant })
    }
}

/// Immutable-after-load table of tenants
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Arc<EndpointInfo>>,
    friendly_names: HashMap<String, String>,
    environments: HashMap<EnvironmentType, EnvironmentSettings>,
    defaults: HashMap<EnvironmentType, String>,
}

impl EndpointRegistry {
    /// Validate the registry file contents and build the table
    pub fn from_config(
        config: &RegistryConfig,
        keyring: &SecretKeyRing,
    ) -> Result<Self, RegistryError> {
        let environments: HashMap<EnvironmentType, EnvironmentSettings> = config
            .environments
            .iter()
            .map(|(env, settings)| {
                (
                    *env,
                    EnvironmentSettings {
                        upstream_url: settings.upstream_url.trim_end_matches('/').to_string(),
                        token_resource: settings.token_resource.clone(),
                    },
                )
            })
            .collect();

        let mut endpoints = HashMap::new();
        let mut friendly_names = HashMap::new();

        for entry in &config.endpoints {
            let tenant_id = entry.tenant_id.trim().to_string();
            require_non_empty(&tenant_id, &tenant_id, "tenant_id")?;
            require_non_empty(&tenant_id, &entry.client_id, "client_id")?;
            require_non_empty(&tenant_id, &entry.read_only_group, "read_only_group")?;
            require_non_empty(&tenant_id, &entry.read_write_group, "read_write_group")?;

            if !environments.contains_key(&entry.environment) {
                return Err(RegistryError::MissingEnvironment {
                    tenant_id,
                    environment: entry.environment,
                });
            }

            if !keyring.contains(&entry.secret_key_id) {
                return Err(RegistryError::UnknownSecretKey {
                    tenant_id,
                    key_id: entry.secret_key_id.clone(),
                });
            }

            let client_secret =
                EncryptedSecret::from_base64(&entry.secret_key_id, &entry.client_secret).map_err(
                    |source| RegistryError::InvalidSecret {
                        tenant_id: tenant_id.clone(),
                        source,
                    },
                )?;

            let key = tenant_id.to_ascii_lowercase();
            if endpoints.contains_key(&key) {
                return Err(RegistryError::DuplicateTenant(tenant_id));
            }

            let friendly_name = entry
                .tenant_friendly_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string);

            if let Some(name) = &friendly_name {
                let name_key = name.to_ascii_lowercase();
                if friendly_names.contains_key(&name_key) {
                    return Err(RegistryError::DuplicateFriendlyName(name.clone()));
                }
                friendly_names.insert(name_key, key.clone());
            }

            debug!(
                tenant_id = %tenant_id,
                environment = %entry.environment,
                "Registered endpoint"
            );

            endpoints.insert(
                key,
                Arc::new(EndpointInfo::new(
                    tenant_id,
                    friendly_name,
                    entry.environment,
                    entry.client_id.clone(),
                    client_secret,
                    entry.read_only_group.clone(),
                    entry.read_write_group.clone(),
                )),
            );
        }

        let mut registry = Self {
            endpoints,
            friendly_names,
            environments,
            defaults: HashMap::new(),
        };

        for (environment, settings) in &config.environments {
            let Some(tenant) = settings.default_tenant.as_deref() else {
                continue;
            };

            let endpoint = registry
                .lookup_id(tenant)
                .or_else(|| registry.lookup_name(tenant))
                .ok_or_else(|| RegistryError::UnknownDefaultTenant {
                    environment: *environment,
                    tenant: tenant.to_string(),
                })?;

            if endpoint.environment != *environment {
                return Err(RegistryError::DefaultTenantEnvironmentMismatch {
                    environment: *environment,
                    tenant: tenant.to_string(),
                });
            }

            let key = endpoint.tenant_id.to_ascii_lowercase();
            registry.defaults.insert(*environment, key);
        }

        info!(
            endpoints = registry.endpoints.len(),
            defaults = registry.defaults.len(),
            "Endpoint registry ready"
        );

        Ok(registry)
    }

    /// Resolve the tenant an inbound request asked for
    pub fn resolve(&self, selector: &TenantSelector) -> Result<Arc<EndpointInfo>, ProxyError> {
        let endpoint = match &selector.tenant {
            Some(TenantRef::Id(id)) => self
                .lookup_id(id)
                .ok_or_else(|| ProxyError::UnknownTenant(id.clone()))?,
            Some(TenantRef::Name(name)) => self
                .lookup_name(name)
                .ok_or_else(|| ProxyError::UnknownTenant(name.clone()))?,
            None => self
                .defaults
                .get(&selector.environment)
                .and_then(|key| self.endpoints.get(key))
                .cloned()
                .ok_or_else(|| {
                    ProxyError::UnknownTenant(format!(
                        "no default tenant configured for {}",
                        selector.environment
                    ))
                })?,
        };

        if endpoint.environment != selector.environment {
            return Err(ProxyError::UnknownTenant(format!(
                "{} is not a {} tenant",
                endpoint.display_name(),
                selector.environment
            )));
        }

        Ok(endpoint)
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<EndpointInfo>> {
        self.lookup_id(tenant_id)
    }

    pub fn environment(&self, environment: EnvironmentType) -> Option<&EnvironmentSettings> {
        self.environments.get(&environment)
    }

    /// Default tenant id for an environment, if one is configured
    pub fn default_tenant(&self, environment: EnvironmentType) -> Option<&str> {
        self.defaults
            .get(&environment)
            .and_then(|key| self.endpoints.get(key))
            .map(|endpoint| endpoint.tenant_id.as_str())
    }

    /// All endpoints ordered by environment then tenant id
    pub fn endpoints(&self) -> Vec<Arc<EndpointInfo>> {
        let mut all: Vec<_> = self.endpoints.values().cloned().collect();
        all.sort_by(|a, b| {
            (a.environment == EnvironmentType::Internal, &a.tenant_id)
                .cmp(&(b.environment == EnvironmentType::Internal, &b.tenant_id))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn lookup_id(&self, tenant_id: &str) -> Option<Arc<EndpointInfo>> {
        self.endpoints
            .get(&tenant_id.trim().to_ascii_lowercase())
            .cloned()
    }

    fn lookup_name(&self, name: &str) -> Option<Arc<EndpointInfo>> {
        self.friendly_names
            .get(&name.trim().to_ascii_lowercase())
            .and_then(|key| self.endpoints.get(key))
            .cloned()
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                      Private Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

fn header_text(headers: &HeaderMap, name: &str) -> Result<Option<String>, ProxyError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let text = value.to_str().map_err(|_| {
                ProxyError::InvalidRequest(format!("{} header is not valid text", name))
            })?;
            let text = text.trim();
            Ok(if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            })
        }
    }
}

fn require_non_empty(
    tenant_id: &str,
    value: &str,
    field: &'static str,
) -> Result<(), RegistryError> {
    if value.trim().is_empty() {
        return Err(RegistryError::EmptyField {
            tenant_id: tenant_id.to_string(),
            field,
        });
    }
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{registry_config, test_keyring};
    use axum::http::HeaderValue;
    use tokio::time::Instant;

    fn registry() -> EndpointRegistry {
        let keyring = test_keyring();
        EndpointRegistry::from_config(&registry_config(&keyring, "http://unused"), &keyring)
            .unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_selector_defaults_to_production() {
        let selector = TenantSelector::from_headers(&HeaderMap::new()).unwrap();
        assert_eq!(selector, TenantSelector::production_default());
    }

    #[test]
    fn test_selector_tenant_id_wins_over_name() {
        let selector = TenantSelector::from_headers(&headers(&[
            ("UseINT", "true"),
            ("TenantId", "abc"),
            ("TenantName", "contoso"),
        ]))
        .unwrap();
        assert_eq!(selector.environment, EnvironmentType::Internal);
        assert_eq!(selector.tenant, Some(TenantRef::Id("abc".into())));
    }

    #[test]
    fn test_selector_rejects_garbage_use_int() {
        let result = TenantSelector::from_headers(&headers(&[("UseINT", "maybe")]));
        assert!(matches!(result, Err(ProxyError::InvalidRequest(_))));
    }

    #[test]
    fn test_resolve_default_by_id_and_by_name() {
        let registry = registry();

        let default = registry.resolve(&TenantSelector::production_default()).unwrap();
        assert_eq!(default.tenant_id, "tenant-prod");

        let by_name = registry
            .resolve(&TenantSelector {
                environment: EnvironmentType::Production,
                tenant: Some(TenantRef::Name("CONTOSO".into())),
            })
            .unwrap();
        assert_eq!(by_name.tenant_id, "tenant-prod");

        let internal = registry
            .resolve(&TenantSelector {
                environment: EnvironmentType::Internal,
                tenant: None,
            })
            .unwrap();
        assert_eq!(internal.tenant_id, "tenant-int");
    }

    #[test]
    fn test_resolve_unknown_and_cross_environment_tenants() {
        let registry = registry();

        let unknown = registry.resolve(&TenantSelector {
            environment: EnvironmentType::Production,
            tenant: Some(TenantRef::Id("nope".into())),
        });
        assert!(matches!(unknown, Err(ProxyError::UnknownTenant(_))));

        let wrong_env = registry.resolve(&TenantSelector {
            environment: EnvironmentType::Production,
            tenant: Some(TenantRef::Id("tenant-int".into())),
        });
        assert!(matches!(wrong_env, Err(ProxyError::UnknownTenant(_))));
    }

    #[test]
    fn test_duplicate_tenant_rejected() {
        let keyring = test_keyring();
        let mut config = registry_config(&keyring, "http://unused");
        let mut duplicate = config.endpoints[0].clone();
        duplicate.tenant_friendly_name = None;
        duplicate.tenant_id = duplicate.tenant_id.to_uppercase();
        config.endpoints.push(duplicate);

        assert!(matches!(
            EndpointRegistry::from_config(&config, &keyring),
            Err(RegistryError::DuplicateTenant(_))
        ));
    }

    #[test]
    fn test_unknown_secret_key_rejected() {
        let keyring = test_keyring();
        let mut config = registry_config(&keyring, "http://unused");
        config.endpoints[0].secret_key_id = "retired".into();

        assert!(matches!(
            EndpointRegistry::from_config(&config, &keyring),
            Err(RegistryError::UnknownSecretKey { .. })
        ));
    }

    #[test]
    fn test_default_tenant_must_match_environment() {
        let keyring = test_keyring();
        let mut config = registry_config(&keyring, "http://unused");
        config
            .environments
            .get_mut(&EnvironmentType::Production)
            .unwrap()
            .default_tenant = Some("tenant-int".into());

        assert!(matches!(
            EndpointRegistry::from_config(&config, &keyring),
            Err(RegistryError::DefaultTenantEnvironmentMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_friendly_name_rejected() {
        let keyring = test_keyring();
        let mut config = registry_config(&keyring, "http://unused");
        config.endpoints[1].tenant_friendly_name = Some(" CONTOSO ".into());

        assert!(matches!(
            EndpointRegistry::from_config(&config, &keyring),
            Err(RegistryError::DuplicateFriendlyName(name)) if name == "CONTOSO"
        ));
    }

    #[test]
    fn test_secret_that_is_not_base64_rejected() {
        let keyring = test_keyring();
        let mut config = registry_config(&keyring, "http://unused");
        config.endpoints[0].client_secret = "not base64 at all!".into();

        assert!(matches!(
            EndpointRegistry::from_config(&config, &keyring),
            Err(RegistryError::InvalidSecret {
                source: crate::security::SecretError::InvalidEncoding(_),
                ..
            })
        ));
    }

    #[test]
    fn test_unparseable_registry_file_rejected() {
        let path = std::env::temp_dir().join(format!("storeproxy-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"environments": {}, "endpoints": [ {"tenant_id": "#).unwrap();

        let result = RegistryConfig::load(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(RegistryError::Parse(_))));

        assert!(matches!(
            RegistryConfig::load(std::path::Path::new("/nonexistent/storeproxy/endpoints.json")),
            Err(RegistryError::Io { .. })
        ));
    }

    #[test]
    fn test_publish_replaces_cached_token() {
        let registry = registry();
        let endpoint = registry.get("tenant-prod").unwrap();
        assert!(endpoint.cached_token().is_none());

        let expiry = Instant::now() + std::time::Duration::from_secs(60);
        endpoint.publish_token(AccessToken::new("first", expiry));
        endpoint.publish_token(AccessToken::new("second", expiry));
        assert_eq!(endpoint.cached_token().unwrap().secret(), "second");
    }
}
