//! # Request Forwarder Module
//!
//! Relays an authorized request to the upstream Submission API and hands the
//! upstream answer back untouched.
//!
//! ## Features
//!
//! - **URL Reconstruction**: Upstream base URL plus the caller's original path and query
//! - **Header Hygiene**: Proxy-only, credential and hop-by-hop headers never reach the upstream
//! - **Verbatim Relay**: Status, headers and body of every upstream answer, including 4xx/5xx
//! - **Transport Failures**: Timeouts, DNS and connection errors become `UpstreamUnreachable`
//!
//! The forwarder never retries. A failed upstream call is the caller's to retry.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::auth::types::AccessToken;
use crate::errors::ProxyError;
use crate::registry::{TENANT_ID_HEADER, TENANT_NAME_HEADER, USE_INT_HEADER};

/// Connection-scoped headers that are never forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// The parts of an inbound request that travel upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream answer, kept byte-for-byte
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Sends authorized requests to the upstream API
#[derive(Clone)]
pub struct RequestForwarder {
    client: Client,
    identity_header: HeaderName,
}

impl RequestForwarder {
    pub fn new(client: Client, identity_header: HeaderName) -> Self {
        Self {
            client,
            identity_header,
        }
    }

    /// Absolute upstream URL for a request path
    pub fn upstream_url(base_url: &str, path_and_query: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{}{}", base, path_and_query)
        } else {
            format!("{}/{}", base, path_and_query)
        }
    }

    /// Forward `request` to `base_url` with `token` as the bearer credential
    pub async fn forward(
        &self,
        base_url: &str,
        request: UpstreamRequest,
        token: &AccessToken,
    ) -> Result<UpstreamResponse, ProxyError> {
        let url = Self::upstream_url(base_url, &request.path_and_query);
        let headers = self.outbound_headers(&request.headers);

        debug!(method = %request.method, upstream_url = %url, "Forwarding request upstream");
        let start = std::time::Instant::now();

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .header(header::AUTHORIZATION, token.bearer_header());
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| unreachable(&url, e))?;

        let status = response.status();
        let headers = relayed_headers(response.headers());
        let body = response.bytes().await.map_err(|e| unreachable(&url, e))?;

        info!(
            method = %request.method,
            upstream_url = %url,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Upstream response received"
        );

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    /// Copy of the inbound headers minus everything the upstream must not see
    pub fn outbound_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(inbound.len());
        let listed = connection_listed(inbound);

        for (name, value) in inbound {
            if self.is_proxy_only(name) || is_hop_by_hop(name, &listed) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        headers
    }

    fn is_proxy_only(&self, name: &HeaderName) -> bool {
        *name == self.identity_header
            || *name == header::AUTHORIZATION
            || *name == header::HOST
            || *name == header::CONTENT_LENGTH
            || matches!(
                name.as_str(),
                USE_INT_HEADER | TENANT_ID_HEADER | TENANT_NAME_HEADER
            )
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                      Private Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Header names listed in `Connection`, which are connection-scoped as well
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_hop_by_hop(name: &HeaderName, listed: &[String]) -> bool {
    HOP_BY_HOP.contains(&name.as_str()) || listed.iter().any(|token| token == name.as_str())
}

fn relayed_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    let listed = connection_listed(upstream);
    for (name, value) in upstream {
        if !is_hop_by_hop(name, &listed) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn unreachable(url: &str, error: reqwest::Error) -> ProxyError {
    let timed_out = error.is_timeout();
    warn!(upstream_url = %url, timed_out, error = %error, "Upstream request failed");
    ProxyError::UpstreamUnreachable {
        reason: error.to_string(),
        timed_out,
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;
    use wiremock::matchers::{body_string, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forwarder() -> RequestForwarder {
        RequestForwarder::new(
            Client::new(),
            HeaderName::from_static("x-authenticated-user"),
        )
    }

    fn token() -> AccessToken {
        AccessToken::new("upstream-token", Instant::now() + Duration::from_secs(3600))
    }

    fn request(method: Method, path_and_query: &str, body: &'static str) -> UpstreamRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-authenticated-user", "CORP\\alice".parse().unwrap());
        headers.insert("useint", "false".parse().unwrap());
        headers.insert("tenantid", "tenant-prod".parse().unwrap());
        headers.insert("tenantname", "contoso".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Negotiate abc".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("x-correlation-id", "corr-1".parse().unwrap());
        UpstreamRequest {
            method,
            path_and_query: path_and_query.to_string(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_upstream_url_concatenation() {
        assert_eq!(
            RequestForwarder::upstream_url("https://api.example.com/", "/v1.0/my/applications?skip=10"),
            "https://api.example.com/v1.0/my/applications?skip=10"
        );
        assert_eq!(
            RequestForwarder::upstream_url("https://api.example.com", "v1.0"),
            "https://api.example.com/v1.0"
        );
    }

    #[test]
    fn test_outbound_headers_drop_proxy_only_and_hop_by_hop() {
        let headers = forwarder().outbound_headers(&request(Method::GET, "/", "").headers);

        assert!(headers.get("x-authenticated-user").is_none());
        assert!(headers.get("useint").is_none());
        assert!(headers.get("tenantid").is_none());
        assert!(headers.get("tenantname").is_none());
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get("x-correlation-id").unwrap(), "corr-1");
    }

    #[test]
    fn test_headers_named_by_connection_are_dropped() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::CONNECTION, "close, X-Session-Hint".parse().unwrap());
        inbound.append(header::CONNECTION, "x-trace-hop".parse().unwrap());
        inbound.insert("x-session-hint", "abc".parse().unwrap());
        inbound.insert("x-trace-hop", "1".parse().unwrap());
        inbound.insert("x-correlation-id", "corr-1".parse().unwrap());

        let outbound = forwarder().outbound_headers(&inbound);
        assert!(outbound.get("x-session-hint").is_none());
        assert!(outbound.get("x-trace-hop").is_none());
        assert!(outbound.get(header::CONNECTION).is_none());
        assert_eq!(outbound.get("x-correlation-id").unwrap(), "corr-1");

        let relayed = relayed_headers(&inbound);
        assert!(relayed.get("x-session-hint").is_none());
        assert_eq!(relayed.get("x-correlation-id").unwrap(), "corr-1");
    }

    #[tokio::test]
    async fn test_forward_sends_bearer_path_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/my/applications/123/submissions"))
            .and(query_param("force", "true"))
            .and(header_eq("authorization", "Bearer upstream-token"))
            .and(header_eq("x-correlation-id", "corr-1"))
            .and(body_string(r#"{"a":1}"#))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&server)
            .await;

        let response = forwarder()
            .forward(
                &server.uri(),
                request(
                    Method::POST,
                    "/v1.0/my/applications/123/submissions?force=true",
                    r#"{"a":1}"#,
                ),
                &token(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, Bytes::from_static(b"created"));
    }

    #[tokio::test]
    async fn test_upstream_error_is_relayed_not_raised() {
        let server = MockServer::start().await;
        let error_body = r#"{"code":"InvalidState","message":"Submission already pending"}"#;
        Mock::given(method("DELETE"))
            .respond_with(
                ResponseTemplate::new(409)
                    .insert_header("x-ms-request-id", "req-42")
                    .set_body_raw(error_body, "application/json"),
            )
            .mount(&server)
            .await;

        let response = forwarder()
            .forward(&server.uri(), request(Method::DELETE, "/v1.0/x", ""), &token())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::CONFLICT);
        assert_eq!(response.body, Bytes::from(error_body));
        assert_eq!(response.headers.get("x-ms-request-id").unwrap(), "req-42");
    }

    #[tokio::test]
    async fn test_connection_failure_is_unreachable() {
        // Bind then drop a listener to get a port nothing is serving on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = forwarder()
            .forward(&format!("http://{}", addr), request(Method::GET, "/", ""), &token())
            .await;

        match result {
            Err(ProxyError::UpstreamUnreachable { timed_out, .. }) => assert!(!timed_out),
            other => panic!("unexpected result: {:?}", other.map(|r| r.status)),
        }
    }

    #[tokio::test]
    async fn test_upstream_timeout_is_flagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let forwarder =
            RequestForwarder::new(client, HeaderName::from_static("x-authenticated-user"));

        let result = forwarder
            .forward(&server.uri(), request(Method::GET, "/", ""), &token())
            .await;

        let err = result.err().expect("timeout expected");
        assert!(matches!(err, ProxyError::UpstreamUnreachable { timed_out: true, .. }));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
