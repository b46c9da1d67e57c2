//! # Authentication Module
//!
//! Outbound authentication for the proxy: obtaining and caching the bearer
//! tokens presented to the upstream Submission API. Inbound callers are
//! authorized separately in `authz`.
//!
//! ## Features
//!
//! - One OAuth client credentials exchange per tenant per expiry cycle
//! - Lock-free reads of a valid cached token
//! - Per-tenant FIFO mutexes, so tenants never contend with each other
//! - Bounded acquisition time; a hung identity provider cannot hold a tenant's lock
//!
//! ## Sub-modules
//!
//! - `types`: Access token value types
//! - `lock`: `AsyncMutex` and the per-tenant lock table
//! - `oauth`: `TokenAcquirer` and the client credentials implementation
//! - `cache`: `TokenCache`, the double-checked refresh path

pub mod cache;
pub mod lock;
pub mod oauth;
pub mod types;

pub use cache::TokenCache;
pub use oauth::ClientCredentialsAcquirer;
