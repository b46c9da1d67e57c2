//! # Routing Handlers Module
//!
//! The proxy pipeline. Every path except `/health` lands here, whatever the
//! method.
//!
//! ## Request Flow
//!
//! 1. Open the request's `AuditGuard`
//! 2. Read the caller identity placed by the fronting authentication layer
//! 3. Parse the tenant-selection headers
//! 4. Authorize against the tenant's groups (no token work before this passes)
//! 5. Obtain a bearer token from the `TokenCache`
//! 6. Forward to the tenant's environment and relay the answer verbatim
//! 7. The audit record is emitted when the guard drops
//!
//! ## Error Handling
//!
//! Proxy-originated failures are JSON bodies tagged with the request id:
//! - Missing identity (401)
//! - Malformed tenant headers or unreadable body (400)
//! - Not a member of the required group (403)
//! - Unknown tenant (404)
//! - Token acquisition failure (500)
//! - Upstream unreachable (502, or 504 on timeout)
//! - Group lookup failure (503)
//!
//! Upstream error statuses are not proxy failures and pass through unchanged.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use tracing::{debug, info};

use super::forwarder::UpstreamRequest;
use crate::AppState;
use crate::audit::AuditGuard;
use crate::authz::CallerIdentity;
use crate::errors::ProxyError;
use crate::registry::TenantSelector;

/// Largest request body the proxy buffers before forwarding
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Catch-all handler for every proxied method and path
pub async fn handle_proxy_request(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut audit = AuditGuard::begin(
        state.audit_sink.clone(),
        parts.method.to_string(),
        path_and_query.clone(),
    );

    let upstream_request = UpstreamRequest {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body: Default::default(),
    };

    match proxy(&state, &mut audit, upstream_request, body).await {
        Ok(response) => response,
        Err(error) => {
            audit.reject(&error);
            error.to_response(Some(audit.request_id()))
        }
    }
}

/// Liveness probe, never proxied
pub async fn handle_health() -> impl IntoResponse {
    "OK"
}

///////////////////////////////////////////////////////////////////////////////
//****                      Private Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

async fn proxy(
    state: &AppState,
    audit: &mut AuditGuard,
    mut request: UpstreamRequest,
    body: Body,
) -> Result<Response, ProxyError> {
    let identity = CallerIdentity::from_headers(&request.headers, &state.identity_header)
        .ok_or(ProxyError::Unauthenticated)?;
    audit.set_identity(identity.name());

    let selector = TenantSelector::from_headers(&request.headers)?;
    let authorization = state
        .gate
        .authorize(&identity, &selector, &request.method)
        .await?;
    let endpoint = authorization.endpoint;
    audit.set_tenant(&endpoint.tenant_id, authorization.access);

    let environment = state
        .gate
        .registry()
        .environment(endpoint.environment)
        .ok_or_else(|| {
            ProxyError::UnknownTenant(format!("no settings for {}", endpoint.environment))
        })?;

    request.body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("request body could not be read: {}", e)))?;

    let token = state.token_cache.get_token(&endpoint).await?;
    debug!(
        request_id = %audit.request_id(),
        tenant_id = %endpoint.tenant_id,
        "Bearer token ready"
    );

    let upstream = state
        .forwarder
        .forward(&environment.upstream_url, request, &token)
        .await?;

    info!(
        request_id = %audit.request_id(),
        identity = %identity,
        tenant_id = %endpoint.tenant_id,
        status = upstream.status.as_u16(),
        "Request relayed"
    );
    audit.complete(upstream.status.as_u16());

    Ok(upstream.into_response())
}
