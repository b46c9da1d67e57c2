//! # Routing Module
//!
//! Inbound HTTP surface of the proxy.
//!
//! ## Sub-modules
//!
//! - `router`: axum router construction
//! - `handlers`: the authorize, token, forward pipeline
//! - `forwarder`: upstream request relay

pub mod forwarder;
pub mod handlers;
pub mod router;
