//! OAuth client credentials exchange
//!
//! The identity provider is asked for a bearer token on behalf of one tenant
//! using that tenant's client id and secret. The secret is stored encrypted and
//! is decrypted only for the duration of the exchange.
//!
//! Requests are form encoded and posted to `{authority}/{tenant_id}/oauth2/token`
//! with the environment's `resource`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::types::AcquiredToken;
use crate::errors::TokenError;
use crate::registry::{EndpointInfo, EndpointRegistry};
use crate::security::SecretKeyRing;

/// Lifetime assumed when the identity provider omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Longest lifetime accepted from the identity provider
const MAX_EXPIRES_IN_SECS: u64 = 24 * 60 * 60;

/// Longest identity provider error body carried into logs and errors
const MAX_ERROR_BODY: usize = 512;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Performs the credential exchange for a tenant
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    async fn acquire(&self, endpoint: &EndpointInfo) -> Result<AcquiredToken, TokenError>;
}

/// Client credentials grant against an Azure AD style authority
pub struct ClientCredentialsAcquirer {
    client: Client,
    authority: String,
    registry: Arc<EndpointRegistry>,
    keyring: Arc<SecretKeyRing>,
}

impl ClientCredentialsAcquirer {
    pub fn new(
        client: Client,
        authority: &str,
        registry: Arc<EndpointRegistry>,
        keyring: Arc<SecretKeyRing>,
    ) -> Self {
        Self {
            client,
            authority: authority.trim_end_matches('/').to_string(),
            registry,
            keyring,
        }
    }

    pub fn token_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/token", self.authority, tenant_id)
    }
}

#[async_trait]
impl TokenAcquirer for ClientCredentialsAcquirer {
    async fn acquire(&self, endpoint: &EndpointInfo) -> Result<AcquiredToken, TokenError> {
        let resource = self
            .registry
            .environment(endpoint.environment)
            .map(|settings| settings.token_resource.clone())
            .ok_or_else(|| {
                TokenError::InvalidResponse(format!(
                    "no settings for environment {}",
                    endpoint.environment
                ))
            })?;

        let client_secret = self
            .keyring
            .decrypt(&endpoint.client_secret)
            .map_err(|e| TokenError::SecretDecryption(e.to_string()))?;

        let token_url = self.token_url(&endpoint.tenant_id);
        info!(
            tenant_id = %endpoint.tenant_id,
            client_id = %endpoint.client_id,
            "Requesting access token from {}",
            token_url
        );

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", endpoint.client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("resource", resource.as_str()),
        ];

        let response = self
            .client
            .post(&token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(tenant_id = %endpoint.tenant_id, error = %e, "Token request failed");
                TokenError::Transport(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        if !status.is_success() {
            error!(
                tenant_id = %endpoint.tenant_id,
                status = status.as_u16(),
                "Identity provider rejected token request"
            );
            return Err(TokenError::IdentityProvider {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;
        let expires_in = parse_expires_in(parsed.expires_in.as_ref())?;

        debug!(
            tenant_id = %endpoint.tenant_id,
            expires_in_secs = expires_in.as_secs(),
            "Access token received"
        );

        Ok(AcquiredToken {
            access_token: parsed.access_token,
            expires_in,
        })
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

// Other fields (token_type, ext_expires_in, resource) are ignored
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

///////////////////////////////////////////////////////////////////////////////
//****                      Private Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// The v1 endpoint sends `expires_in` as a string, v2 as a number
fn parse_expires_in(value: Option<&Value>) -> Result<Duration, TokenError> {
    let secs = match value {
        None | Some(Value::Null) => DEFAULT_EXPIRES_IN_SECS,
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| TokenError::InvalidResponse(format!("bad expires_in {}", n)))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| TokenError::InvalidResponse(format!("bad expires_in '{}'", s)))?,
        Some(other) => {
            return Err(TokenError::InvalidResponse(format!(
                "bad expires_in {}",
                other
            )));
        }
    };

    if secs > MAX_EXPIRES_IN_SECS {
        return Err(TokenError::InvalidResponse(format!(
            "expires_in {} exceeds {} seconds",
            secs, MAX_EXPIRES_IN_SECS
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
