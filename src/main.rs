//! # storeproxy
//!
//! Authorizing REST proxy in front of the Store Submission API. Callers that
//! cannot hold API credentials send their requests here; the proxy checks
//! their group membership for the requested tenant, attaches a bearer token
//! obtained with that tenant's client credentials, and relays the upstream
//! response verbatim.

mod audit;
mod auth;
mod authz;
mod cli;
mod env;
mod errors;
mod logging;
mod registry;
mod routing;
mod security;
mod server;
#[cfg(test)]
mod tests;

use axum::http::HeaderName;
use std::process::ExitCode;
use std::sync::Arc;

use audit::AuditSink;
use auth::TokenCache;
use authz::AuthorizationGate;
use routing::forwarder::RequestForwarder;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthorizationGate>,
    pub token_cache: Arc<TokenCache>,
    pub forwarder: RequestForwarder,
    pub audit_sink: Arc<dyn AuditSink>,
    pub identity_header: HeaderName,
}

#[tokio::main]
async fn main() -> ExitCode {
    cli::parse_cli_commands().await
}
