//! # Error Module
//!
//! Error taxonomy for the proxy pipeline. Every way a request can be turned
//! away by the proxy itself maps to one `ProxyError` variant with a fixed
//! status code and machine-readable error code.
//!
//! An upstream API answering with a non-2xx status is *not* an error here:
//! the forwarder relays that response verbatim and the caller parses the
//! original API's error shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::authz::AccessLevel;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Types                              ****//
///////////////////////////////////////////////////////////////////////////////

/// Failures raised while obtaining a bearer token from the identity provider
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("client secret could not be decrypted: {0}")]
    SecretDecryption(String),

    #[error("identity provider request failed: {0}")]
    Transport(String),

    #[error("identity provider returned {status}: {body}")]
    IdentityProvider { status: u16, body: String },

    #[error("identity provider response was malformed: {0}")]
    InvalidResponse(String),

    #[error("token acquisition timed out after {0:?}")]
    Timeout(Duration),
}

/// Request-level failures produced by the proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("caller identity was not supplied by the transport")]
    Unauthenticated,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("{identity} lacks {required} access to tenant {tenant_id}")]
    Forbidden {
        identity: String,
        tenant_id: String,
        required: AccessLevel,
    },

    #[error("group membership lookup failed: {0}")]
    MembershipLookupFailed(String),

    #[error("token acquisition failed: {0}")]
    TokenAcquisitionFailed(#[from] TokenError),

    #[error("upstream unreachable: {reason}")]
    UpstreamUnreachable { reason: String, timed_out: bool },
}

impl ProxyError {
    /// HTTP status the caller receives for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::UnknownTenant(_) => StatusCode::NOT_FOUND,
            ProxyError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ProxyError::MembershipLookupFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::TokenAcquisitionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamUnreachable { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable error code placed in the JSON body
    pub fn error_code(&self) -> &'static str {
        match self {
            ProxyError::Unauthenticated => "UNAUTHENTICATED",
            ProxyError::InvalidRequest(_) => "INVALID_REQUEST",
            ProxyError::UnknownTenant(_) => "UNKNOWN_TENANT",
            ProxyError::Forbidden { .. } => "FORBIDDEN",
            ProxyError::MembershipLookupFailed(_) => "MEMBERSHIP_LOOKUP_FAILED",
            ProxyError::TokenAcquisitionFailed(_) => "TOKEN_ACQUISITION_FAILED",
            ProxyError::UpstreamUnreachable { .. } => "UPSTREAM_UNREACHABLE",
        }
    }

    /// Build the JSON error response, tagged with the request id when known
    pub fn to_response(&self, request_id: Option<&str>) -> Response {
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "request_id": request_id,
        });

        (self.status_code(), axum::Json(body)).into_response()
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_status_codes_are_distinct_per_failure_kind() {
        assert_eq!(ProxyError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ProxyError::UnknownTenant("t".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::Forbidden {
                identity: "alice".into(),
                tenant_id: "t".into(),
                required: AccessLevel::ReadWrite,
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::from(TokenError::Timeout(Duration::from_secs(1))).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::UpstreamUnreachable {
                reason: "reset".into(),
                timed_out: false
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamUnreachable {
                reason: "slow".into(),
                timed_out: true
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_error_response_body_carries_code_and_request_id() {
        let response = ProxyError::UnknownTenant("contoso".into()).to_response(Some("req-1"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "UNKNOWN_TENANT");
        assert_eq!(body["request_id"], "req-1");
        assert!(body["message"].as_str().unwrap().contains("contoso"));
    }
}
