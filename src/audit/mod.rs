//! # Audit Module
//!
//! Non-repudiation records for proxied requests. Every inbound request gets
//! exactly one `AuditRecord` stating who did what, against which tenant, and
//! how it ended.
//!
//! ## Features
//!
//! - **Exactly Once**: The record is emitted when the request's `AuditGuard` drops
//! - **Cancellation Safe**: A handler future dropped mid-flight still produces a record, marked `Aborted`
//! - **Pluggable Sink**: Records go to an `AuditSink`; the default writes to the `storeproxy::audit` tracing target
//!
//! ## Usage
//!
//! ```rust
//! use crate::audit::{AuditGuard, TracingAuditSink};
//!
//! let mut audit = AuditGuard::begin(sink, "GET".to_string(), "/v1.0/my/applications".to_string());
//! audit.set_identity("CORP\\alice");
//! audit.complete(200);
//! // record is emitted here, when `audit` goes out of scope
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
#[cfg(test)]
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authz::AccessLevel;
use crate::errors::ProxyError;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Upstream answered, whatever its status
    Relayed,
    /// The proxy refused or failed the request itself
    Rejected,
    /// The handler was dropped before reaching a decision
    Aborted,
}

/// One audit entry per inbound request
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub identity: Option<String>,
    pub method: String,
    pub uri: String,
    pub tenant_id: Option<String>,
    pub access: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub outcome: AuditOutcome,
    pub error: Option<String>,
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes audit records as structured tracing events
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let identity = record.identity.as_deref().unwrap_or("-");
        let tenant_id = record.tenant_id.as_deref().unwrap_or("-");
        let status = record.status_code.unwrap_or(0);

        match record.outcome {
            AuditOutcome::Relayed => info!(
                target: "storeproxy::audit",
                request_id = %record.request_id,
                identity,
                method = %record.method,
                uri = %record.uri,
                tenant_id,
                access = record.access.as_deref().unwrap_or("-"),
                timestamp = %record.timestamp.to_rfc3339(),
                status,
                duration_ms = record.duration_ms,
                outcome = "relayed",
                "Request relayed"
            ),
            outcome => warn!(
                target: "storeproxy::audit",
                request_id = %record.request_id,
                identity,
                method = %record.method,
                uri = %record.uri,
                tenant_id,
                timestamp = %record.timestamp.to_rfc3339(),
                status,
                duration_ms = record.duration_ms,
                outcome = ?outcome,
                error = record.error.as_deref().unwrap_or("-"),
                "Request not relayed"
            ),
        }
    }
}

/// Keeps records in memory for inspection
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

#[cfg(test)]
impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Collects audit details over a request and emits them once on drop
pub struct AuditGuard {
    sink: Arc<dyn AuditSink>,
    started: Instant,
    record: AuditRecord,
}

impl AuditGuard {
    /// Start auditing a request; the outcome is `Aborted` until completed
    pub fn begin(sink: Arc<dyn AuditSink>, method: String, uri: String) -> Self {
        Self {
            sink,
            started: Instant::now(),
            record: AuditRecord {
                request_id: Uuid::new_v4().to_string(),
                identity: None,
                method,
                uri,
                tenant_id: None,
                access: None,
                timestamp: Utc::now(),
                status_code: None,
                duration_ms: 0,
                outcome: AuditOutcome::Aborted,
                error: None,
            },
        }
    }

    pub fn request_id(&self) -> &str {
        &self.record.request_id
    }

    pub fn set_identity(&mut self, identity: &str) {
        self.record.identity = Some(identity.to_string());
    }

    pub fn set_tenant(&mut self, tenant_id: &str, access: AccessLevel) {
        self.record.tenant_id = Some(tenant_id.to_string());
        self.record.access = Some(access.to_string());
    }

    /// Upstream answered with `status`
    pub fn complete(&mut self, status: u16) {
        self.record.status_code = Some(status);
        self.record.outcome = AuditOutcome::Relayed;
        self.record.error = None;
    }

    /// The proxy turned the request away
    pub fn reject(&mut self, error: &ProxyError) {
        self.record.status_code = Some(error.status_code().as_u16());
        self.record.outcome = AuditOutcome::Rejected;
        self.record.error = Some(error.to_string());
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        let mut record = self.record.clone();
        record.duration_ms = self.started.elapsed().as_millis() as u64;
        self.sink.record(record);
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
