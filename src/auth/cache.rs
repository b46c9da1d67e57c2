//! # Token Cache Module
//!
//! Hands out a currently valid bearer token for a tenant, refreshing at most
//! once per expiry cycle however many requests ask at the same moment.
//!
//! ## Algorithm
//!
//! 1. Read the tenant's cached token. Valid outside the safety margin: return it, no locking.
//! 2. Otherwise acquire the tenant's `AsyncMutex`.
//! 3. Re-check the cached token. Another caller may have refreshed it while this one queued.
//! 4. Otherwise run the `TokenAcquirer` under the acquisition timeout and publish the result.
//! 5. Failures release the mutex and are returned to the caller. Nothing is cached.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::lock::LockTable;
use super::oauth::TokenAcquirer;
use super::types::AccessToken;
use crate::errors::TokenError;
use crate::registry::EndpointInfo;

/// Tokens this close to expiry are refreshed
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(300);

/// Upper bound on one credential exchange
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Counters describing how `get_token` calls were served
#[derive(Debug, Default)]
pub struct TokenCacheStats {
    fast_path_hits: AtomicU64,
    lock_acquisitions: AtomicU64,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of `TokenCacheStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCacheSnapshot {
    pub fast_path_hits: u64,
    pub lock_acquisitions: u64,
    pub refreshes: u64,
    pub failures: u64,
}

impl TokenCacheStats {
    pub fn snapshot(&self) -> TokenCacheSnapshot {
        TokenCacheSnapshot {
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Per-tenant token cache backed by `EndpointInfo::cached_token`
pub struct TokenCache {
    acquirer: Arc<dyn TokenAcquirer>,
    locks: LockTable,
    safety_margin: Duration,
    acquire_timeout: Duration,
    stats: TokenCacheStats,
}

impl TokenCache {
    pub fn new(acquirer: Arc<dyn TokenAcquirer>) -> Self {
        Self::with_settings(acquirer, DEFAULT_SAFETY_MARGIN, DEFAULT_ACQUIRE_TIMEOUT)
    }

    pub fn with_settings(
        acquirer: Arc<dyn TokenAcquirer>,
        safety_margin: Duration,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            acquirer,
            locks: LockTable::new(),
            safety_margin,
            acquire_timeout,
            stats: TokenCacheStats::default(),
        }
    }

    pub fn stats(&self) -> &TokenCacheStats {
        &self.stats
    }

    /// Return a token valid beyond the safety margin, refreshing if needed
    pub async fn get_token(&self, endpoint: &EndpointInfo) -> Result<AccessToken, TokenError> {
        if let Some(token) = self.valid_cached(endpoint) {
            self.stats.fast_path_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(token);
        }

        let mutex = self.locks.mutex_for(&endpoint.tenant_id);
        let guard = mutex.acquire().await;
        self.stats.lock_acquisitions.fetch_add(1, Ordering::Relaxed);

        if let Some(token) = self.valid_cached(endpoint) {
            debug!(tenant_id = %endpoint.tenant_id, "Token refreshed by another request");
            guard.release();
            return Ok(token);
        }

        let result = self.refresh(endpoint).await;
        guard.release();
        result
    }

    fn valid_cached(&self, endpoint: &EndpointInfo) -> Option<AccessToken> {
        endpoint
            .cached_token()
            .filter(|token| token.is_valid_for(self.safety_margin))
    }

    async fn refresh(&self, endpoint: &EndpointInfo) -> Result<AccessToken, TokenError> {
        let requested_at = Instant::now();

        let acquired =
            match tokio::time::timeout(self.acquire_timeout, self.acquirer.acquire(endpoint)).await
            {
                Ok(Ok(acquired)) => acquired,
                Ok(Err(e)) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(tenant_id = %endpoint.tenant_id, error = %e, "Token acquisition failed");
                    return Err(e);
                }
                Err(_) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        tenant_id = %endpoint.tenant_id,
                        timeout_secs = self.acquire_timeout.as_secs(),
                        "Token acquisition timed out"
                    );
                    return Err(TokenError::Timeout(self.acquire_timeout));
                }
            };

        let Some(expires_at) = requested_at.checked_add(acquired.expires_in) else {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                tenant_id = %endpoint.tenant_id,
                expires_in_secs = acquired.expires_in.as_secs(),
                "Token lifetime out of range"
            );
            return Err(TokenError::InvalidResponse(format!(
                "expires_in {}s is out of range",
                acquired.expires_in.as_secs()
            )));
        };
        let token = AccessToken::new(acquired.access_token, expires_at);
        if !token.is_valid_for(self.safety_margin) {
            warn!(
                tenant_id = %endpoint.tenant_id,
                expires_in_secs = acquired.expires_in.as_secs(),
                "Token lifetime is shorter than the safety margin"
            );
        }

        endpoint.publish_token(token.clone());
        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(
            tenant_id = %endpoint.tenant_id,
            expires_in_secs = acquired.expires_in.as_secs(),
            "Access token refreshed"
        );

        Ok(token)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
