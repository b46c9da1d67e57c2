//! Server module for storeproxy.
//!
//! Wires configuration, the endpoint registry, the token cache and the
//! authorization gate into the shared `AppState`, then serves the router until
//! a shutdown signal arrives.
//!
//! # Features
//!
//! - **Startup Validation**: Registry and key ring problems stop the process before it binds
//! - **Graceful Shutdown**: Ctrl+C or SIGTERM stops accepting connections and drains in-flight requests
//! - **Background Reporting**: Periodic token cache counters in the log
//!
//! # Usage
//!
//! ```rust
//! let config = crate::env::validate_environment().map_err(|_| "invalid environment")?;
//! start_server(config).await?;
//! ```

pub mod shutdown;

use self::shutdown::{ShutdownAwareTask, ShutdownCoordinator};
use crate::AppState;
use crate::audit::TracingAuditSink;
use crate::auth::{ClientCredentialsAcquirer, TokenCache};
use crate::authz::{AuthorizationGate, StaticGroupResolver};
use crate::env::AppConfig;
use crate::registry::config::RegistryConfig;
use crate::registry::{EndpointRegistry, RegistryError};
use crate::routing::forwarder::RequestForwarder;
use crate::routing::router::create_router;
use crate::security::http::{HttpClientConfig, create_client_with_config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// How often token cache counters are logged
const STATS_INTERVAL: Duration = Duration::from_secs(300);

/// How long background tasks get to stop after the server has drained
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Failures that stop the proxy from starting or serving
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Load the registry file named by `config` and build the shared state
pub fn build_state(config: &AppConfig) -> Result<AppState, StartupError> {
    let registry_config = RegistryConfig::load(&config.endpoints_file)?;
    build_state_from(&registry_config, config)
}

/// Build the shared state from an already parsed registry
pub fn build_state_from(
    registry_config: &RegistryConfig,
    config: &AppConfig,
) -> Result<AppState, StartupError> {
    let registry = Arc::new(EndpointRegistry::from_config(
        registry_config,
        &config.secret_keys,
    )?);

    let idp_client =
        create_client_with_config(HttpClientConfig::for_identity_provider(config.token_timeout))?;
    let acquirer = Arc::new(ClientCredentialsAcquirer::new(
        idp_client,
        &config.authority_url,
        Arc::clone(&registry),
        Arc::clone(&config.secret_keys),
    ));
    let token_cache = Arc::new(TokenCache::with_settings(
        acquirer,
        config.token_safety_margin,
        config.token_timeout,
    ));

    let resolver = Arc::new(StaticGroupResolver::new(&registry_config.group_memberships));
    let gate = Arc::new(AuthorizationGate::new(Arc::clone(&registry), resolver));

    let upstream_client =
        create_client_with_config(HttpClientConfig::for_upstream(config.upstream_timeout))?;
    let forwarder = RequestForwarder::new(upstream_client, config.identity_header.clone());

    Ok(AppState {
        gate,
        token_cache,
        forwarder,
        audit_sink: Arc::new(TracingAuditSink),
        identity_header: config.identity_header.clone(),
    })
}

/// Start the proxy server with graceful shutdown support
pub async fn start_server(config: AppConfig) -> Result<(), StartupError> {
    let state = build_state(&config)?;
    let shutdown_coordinator = ShutdownCoordinator::new();

    start_background_services(&state, &shutdown_coordinator);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind_address,
            source,
        })?;
    let addr = listener.local_addr().map_err(StartupError::Serve)?;
    info!("storeproxy running on http://{}", addr);

    let shutdown_for_server = shutdown_coordinator.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_for_server.wait_for_shutdown_signal().await;
    });

    if let Err(err) = server.await {
        error!("storeproxy server error: {}", err);
        return Err(StartupError::Serve(err));
    }

    shutdown_coordinator.initiate_shutdown();
    shutdown_coordinator
        .wait_for_tasks_completion(TASK_SHUTDOWN_TIMEOUT)
        .await;
    info!("storeproxy shutdown complete");
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
//****                      Private Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Start all background services with shutdown awareness
fn start_background_services(state: &AppState, shutdown_coordinator: &ShutdownCoordinator) {
    let token_cache = Arc::clone(&state.token_cache);
    let mut shutdown_task = ShutdownAwareTask::new(shutdown_coordinator);

    shutdown_coordinator.spawn(async move {
        info!("Starting token cache reporting service");
        loop {
            if shutdown_task.wait_or_shutdown(STATS_INTERVAL).await {
                info!("Token cache reporting service shutting down");
                break;
            }

            let stats = token_cache.stats().snapshot();
            info!(
                fast_path_hits = stats.fast_path_hits,
                lock_acquisitions = stats.lock_acquisitions,
                refreshes = stats.refreshes,
                failures = stats.failures,
                "Token cache statistics"
            );
        }
    });
}
