//! Shared fixtures for unit and integration tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::auth::oauth::TokenAcquirer;
use crate::auth::types::AcquiredToken;
use crate::errors::TokenError;
use crate::registry::config::{EndpointConfig, EnvironmentConfig, RegistryConfig};
use crate::registry::{EndpointInfo, EnvironmentType};
use crate::security::SecretKeyRing;

pub const TEST_KEY_ID: &str = "primary";
pub const TEST_KEY: &str = "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyA=";
pub const TEST_CLIENT_SECRET: &str = "s3cr3t-value";

pub const PROD_TENANT: &str = "tenant-prod";
pub const INT_TENANT: &str = "tenant-int";

pub const READER: &str = "CORP\\reader";
pub const WRITER: &str = "CORP\\writer";

pub fn test_keyring() -> SecretKeyRing {
    SecretKeyRing::parse(&format!("{}:{}", TEST_KEY_ID, TEST_KEY)).unwrap()
}

/// Registry with one production and one internal tenant.
///
/// Production upstream is `upstream`, internal is `{upstream}/int`.
pub fn registry_config(keyring: &SecretKeyRing, upstream: &str) -> RegistryConfig {
    let sealed = keyring
        .encrypt(TEST_KEY_ID, TEST_CLIENT_SECRET)
        .unwrap()
        .to_base64();

    let mut environments = HashMap::new();
    environments.insert(
        EnvironmentType::Production,
        EnvironmentConfig {
            upstream_url: upstream.to_string(),
            token_resource: "https://manage.devcenter.microsoft.com".to_string(),
            default_tenant: Some("contoso".to_string()),
        },
    );
    environments.insert(
        EnvironmentType::Internal,
        EnvironmentConfig {
            upstream_url: format!("{}/int", upstream),
            token_resource: "https://manage.devcenter.microsoft.com".to_string(),
            default_tenant: Some(INT_TENANT.to_string()),
        },
    );

    let endpoints = vec![
        EndpointConfig {
            tenant_id: PROD_TENANT.to_string(),
            tenant_friendly_name: Some("contoso".to_string()),
            environment: EnvironmentType::Production,
            client_id: "client-prod".to_string(),
            client_secret: sealed.clone(),
            secret_key_id: TEST_KEY_ID.to_string(),
            read_only_group: "StoreReaders".to_string(),
            read_write_group: "StoreWriters".to_string(),
        },
        EndpointConfig {
            tenant_id: INT_TENANT.to_string(),
            tenant_friendly_name: Some("contoso-int".to_string()),
            environment: EnvironmentType::Internal,
            client_id: "client-int".to_string(),
            client_secret: sealed,
            secret_key_id: TEST_KEY_ID.to_string(),
            read_only_group: "IntReaders".to_string(),
            read_write_group: "IntWriters".to_string(),
        },
    ];

    let mut group_memberships = HashMap::new();
    group_memberships.insert("StoreReaders".to_string(), vec![READER.to_string()]);
    group_memberships.insert("StoreWriters".to_string(), vec![WRITER.to_string()]);
    group_memberships.insert("IntWriters".to_string(), vec![WRITER.to_string()]);

    RegistryConfig {
        environments,
        endpoints,
        group_memberships,
    }
}

/// Standalone endpoint for token cache tests
pub fn test_endpoint(tenant_id: &str) -> EndpointInfo {
    let secret = test_keyring()
        .encrypt(TEST_KEY_ID, TEST_CLIENT_SECRET)
        .unwrap();
    EndpointInfo::new(
        tenant_id.to_string(),
        None,
        EnvironmentType::Production,
        format!("client-{}", tenant_id),
        secret,
        "Readers".to_string(),
        "Writers".to_string(),
    )
}

/// Acquirer that counts calls and hands out `{prefix}-{call number}`
pub struct CountingAcquirer {
    prefix: String,
    calls: AtomicUsize,
    delay: Duration,
    failures: usize,
    expires_in: Duration,
}

impl CountingAcquirer {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failures: 0,
            expires_in: Duration::from_secs(3600),
        }
    }

    /// Fail the first `failures` calls with an identity provider error
    pub fn failing_first(prefix: &str, failures: usize) -> Self {
        Self {
            failures,
            ..Self::new(prefix)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenAcquirer for CountingAcquirer {
    async fn acquire(&self, _endpoint: &EndpointInfo) -> Result<AcquiredToken, TokenError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if call <= self.failures {
            return Err(TokenError::IdentityProvider {
                status: 401,
                body: "invalid_client".to_string(),
            });
        }

        Ok(AcquiredToken {
            access_token: format!("{}-{}", self.prefix, call),
            expires_in: self.expires_in,
        })
    }
}
