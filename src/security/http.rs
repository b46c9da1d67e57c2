//! # HTTP Client Security Module
//!
//! Outbound HTTP client construction for the two remote parties the proxy
//! talks to: the identity provider and the upstream Submission API.
//!
//! ## Features
//!
//! - **Timeout Management**: Request and connection timeouts so a hung remote never pins a task
//! - **Connection Pooling**: Shared pools with bounded idle connections per host
//! - **Redirect Control**: The upstream client never follows redirects, so 3xx answers are relayed as-is
//! - **User Agent**: Consistent user agent string for outbound requests

use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::info;

/// Default request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Maximum number of redirects the identity provider client follows
const MAX_REDIRECTS: usize = 5;

/// Maximum number of idle connections per host
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 10;

/// Pool idle timeout in seconds
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// User agent string for outbound requests
const USER_AGENT: &str = "storeproxy/0.1";

/// Configuration for an outbound HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Total request timeout
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum redirects to follow, zero disables redirects
    pub max_redirects: usize,
    /// Maximum idle connections per host
    pub max_idle_connections_per_host: usize,
    /// Pool idle timeout
    pub pool_idle_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_redirects: MAX_REDIRECTS,
            max_idle_connections_per_host: MAX_IDLE_CONNECTIONS_PER_HOST,
            pool_idle_timeout: Duration::from_secs(POOL_IDLE_TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    /// Settings for the identity provider token endpoint
    pub fn for_identity_provider(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            ..Default::default()
        }
    }

    /// Settings for the upstream Submission API; redirects are relayed, not followed
    pub fn for_upstream(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            max_redirects: 0,
            ..Default::default()
        }
    }
}

/// Create an HTTP client with the given configuration
pub fn create_client_with_config(config: HttpClientConfig) -> Result<Client, reqwest::Error> {
    let redirect = if config.max_redirects == 0 {
        reqwest::redirect::Policy::none()
    } else {
        reqwest::redirect::Policy::limited(config.max_redirects)
    };

    let client = ClientBuilder::new()
        .use_rustls_tls()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .redirect(redirect)
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.max_idle_connections_per_host)
        .build()?;

    info!(
        timeout_secs = config.request_timeout.as_secs(),
        connect_timeout_secs = config.connect_timeout.as_secs(),
        max_redirects = config.max_redirects,
        "HTTP client created"
    );

    Ok(client)
}
