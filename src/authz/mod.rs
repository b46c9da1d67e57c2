//! # Authorization Module
//!
//! Per-request access decisions. The fronting transport authenticates the
//! caller and passes the principal name in a header; this module resolves the
//! requested tenant and checks the caller's group memberships against the
//! tenant's read-only and read-write groups.
//!
//! ## Access Levels
//!
//! - **ReadOnly**: `GET`, `HEAD` and `OPTIONS`. Either group grants it.
//! - **ReadWrite**: every other method. Only the read-write group grants it.
//!
//! Decisions short-circuit the pipeline: a rejected request never triggers
//! token work or an upstream call.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, Method};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::ProxyError;
use crate::registry::{EndpointInfo, EndpointRegistry, TenantSelector};

/// Header set by the fronting authentication layer when none is configured
pub const DEFAULT_IDENTITY_HEADER: &str = "x-authenticated-user";

/// Upper bound on one membership question to the resolver
const MEMBERSHIP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Access a request needs against its tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
}

impl AccessLevel {
    pub fn for_method(method: &Method) -> Self {
        match *method {
            Method::GET | Method::HEAD | Method::OPTIONS => AccessLevel::ReadOnly,
            _ => AccessLevel::ReadWrite,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::ReadOnly => write!(f, "read-only"),
            AccessLevel::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Authenticated principal supplied by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Read the principal from the identity header; absent or blank is `None`
    pub fn from_headers(headers: &HeaderMap, header: &HeaderName) -> Option<Self> {
        headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Self::new)
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures of a group membership lookup
#[derive(Debug, Error)]
pub enum GroupLookupError {
    #[error("group directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of group membership answers
#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Whether `identity` belongs to `group`
    async fn is_member(
        &self,
        identity: &CallerIdentity,
        group: &str,
    ) -> Result<bool, GroupLookupError>;
}

/// Membership taken from the registry file's `group_memberships`
#[derive(Debug, Default)]
pub struct StaticGroupResolver {
    groups: HashMap<String, HashSet<String>>,
}

impl StaticGroupResolver {
    pub fn new(memberships: &HashMap<String, Vec<String>>) -> Self {
        let groups = memberships
            .iter()
            .map(|(group, members)| {
                (
                    group.to_lowercase(),
                    members.iter().map(|m| m.trim().to_lowercase()).collect(),
                )
            })
            .collect();
        Self { groups }
    }
}

#[async_trait]
impl GroupResolver for StaticGroupResolver {
    async fn is_member(
        &self,
        identity: &CallerIdentity,
        group: &str,
    ) -> Result<bool, GroupLookupError> {
        Ok(self
            .groups
            .get(&group.to_lowercase())
            .is_some_and(|members| members.contains(&identity.name().to_lowercase())))
    }
}

/// Outcome of a successful authorization
#[derive(Debug, Clone)]
pub struct Authorization {
    pub identity: CallerIdentity,
    pub endpoint: Arc<EndpointInfo>,
    pub access: AccessLevel,
}

/// Decides whether a caller may use a tenant with a given method
pub struct AuthorizationGate {
    registry: Arc<EndpointRegistry>,
    resolver: Arc<dyn GroupResolver>,
}

impl AuthorizationGate {
    pub fn new(registry: Arc<EndpointRegistry>, resolver: Arc<dyn GroupResolver>) -> Self {
        Self { registry, resolver }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Resolve the tenant and check the caller's groups for `method`
    pub async fn authorize(
        &self,
        identity: &CallerIdentity,
        selector: &TenantSelector,
        method: &Method,
    ) -> Result<Authorization, ProxyError> {
        let endpoint = self.registry.resolve(selector)?;
        let access = AccessLevel::for_method(method);

        let allowed = match access {
            AccessLevel::ReadWrite => self.member_of(identity, &endpoint.read_write_group).await?,
            AccessLevel::ReadOnly => {
                self.member_of(identity, &endpoint.read_only_group).await?
                    || self.member_of(identity, &endpoint.read_write_group).await?
            }
        };

        if !allowed {
            warn!(
                identity = %identity,
                tenant_id = %endpoint.tenant_id,
                method = %method,
                required = %access,
                "Authorization denied"
            );
            return Err(ProxyError::Forbidden {
                identity: identity.to_string(),
                tenant_id: endpoint.tenant_id.clone(),
                required: access,
            });
        }

        debug!(
            identity = %identity,
            tenant_id = %endpoint.tenant_id,
            access = %access,
            "Authorization granted"
        );

        Ok(Authorization {
            identity: identity.clone(),
            endpoint,
            access,
        })
    }

    async fn member_of(&self, identity: &CallerIdentity, group: &str) -> Result<bool, ProxyError> {
        let answer = tokio::time::timeout(
            MEMBERSHIP_LOOKUP_TIMEOUT,
            self.resolver.is_member(identity, group),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GroupLookupError::Unavailable(format!(
                "no answer for group '{}' within {:?}",
                group, MEMBERSHIP_LOOKUP_TIMEOUT
            )))
        });

        answer.map_err(|e| {
            warn!(identity = %identity, group = %group, error = %e, "Membership lookup failed");
            ProxyError::MembershipLookupFailed(e.to_string())
        })
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
