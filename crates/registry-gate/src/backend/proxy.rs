//! Streaming reverse proxy to the origin registry.
//!
//! Request and response bodies are streamed in both directions; blobs are
//! never buffered. Redirects are relayed to the client, since registries
//! commonly redirect blob downloads to object storage.

use crate::errors::GateError;
use crate::observability::metrics;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use reqwest::Url;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards authorized requests to the backend.
pub struct BackendProxy {
    backend_url: Url,
    connect_timeout: Duration,
    client: OnceCell<reqwest::Client>,
}

impl BackendProxy {
    /// The HTTP client is built on first use.
    pub fn new(backend_url: Url, connect_timeout: Duration) -> Self {
        Self {
            backend_url,
            connect_timeout,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client, GateError> {
        self.client
            .get_or_try_init(|| async {
                // Only connecting is bounded; blob transfers may take as long as they need.
                reqwest::Client::builder()
                    .redirect(reqwest::redirect::Policy::none())
                    .connect_timeout(self.connect_timeout)
                    .build()
                    .map_err(|e| {
                        tracing::error!(target: "gate.backend.proxy", error = %e, "Failed to build forwarding client");
                        GateError::Internal
                    })
            })
            .await
    }

    fn target_url(&self, request: &Request) -> Url {
        let mut target = self.backend_url.clone();
        target.set_path(request.uri().path());
        target.set_query(request.uri().query());
        target
    }

    /// Forward `request` with `authorization` as its `Authorization` header and
    /// relay the origin's response unchanged.
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` on any transport failure. Nothing is retried.
    #[instrument(skip_all, name = "gate.backend.forward", fields(method = %request.method()))]
    pub async fn forward(
        &self,
        request: Request,
        authorization: &str,
    ) -> Result<Response, GateError> {
        let client = self.client().await?;
        let target = self.target_url(&request);

        let (parts, body) = request.into_parts();
        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::HOST);
        let authorization = HeaderValue::from_str(authorization).map_err(|e| {
            tracing::error!(target: "gate.backend.proxy", error = %e, "Upstream authorization is not a valid header value");
            GateError::Internal
        })?;
        headers.insert(header::AUTHORIZATION, authorization);

        let upstream = client
            .request(parts.method, target)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| {
                metrics::record_proxied_request(None);
                tracing::error!(target: "gate.backend.proxy", error = %e, "Backend request failed");
                GateError::UpstreamUnavailable(
                    "Server error encountered while handling request".to_string(),
                )
            })?;

        let status = upstream.status();
        metrics::record_proxied_request(Some(status.as_u16()));
        tracing::debug!(target: "gate.backend.proxy", status = status.as_u16(), "Backend responded");

        let response_headers = strip_hop_by_hop(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Copy `headers` without hop-by-hop headers, including any the `Connection`
/// header names.
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let hop_by_hop = HOP_BY_HOP_HEADERS.contains(&name.as_str())
            || connection_listed.iter().any(|listed| listed == name);
        if !hop_by_hop {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use wiremock::matchers::{body_string, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proxy(server: &MockServer) -> BackendProxy {
        BackendProxy::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_forwards_path_query_and_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/tags/list"))
            .and(query_param("n", "10"))
            .and(header_eq("authorization", "Bearer upstream"))
            .and(header_eq("accept", "application/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("docker-content-digest", "sha256:abc")
                    .set_body_string(r#"{"tags":["latest"]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::builder()
            .uri("/v2/team/app/tags/list?n=10")
            .header("authorization", "Bearer client-token")
            .header("accept", "application/json")
            .header("host", "gate.example.com")
            .body(Body::empty())
            .unwrap();

        let response = proxy(&server)
            .forward(request, "Bearer upstream")
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("docker-content-digest").unwrap(),
            "sha256:abc"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"tags":["latest"]}"#);
    }

    #[tokio::test]
    async fn test_streams_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2/team/app/blobs/uploads/1"))
            .and(body_string("layer-bytes"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::builder()
            .method("PUT")
            .uri("/v2/team/app/blobs/uploads/1")
            .body(Body::from("layer-bytes"))
            .unwrap();

        let response = proxy(&server).forward(request, "Bearer t").await.unwrap();
        assert_eq!(response.status(), 201);
    }

    #[tokio::test]
    async fn test_redirects_are_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/team/app/blobs/sha256:abc"))
            .respond_with(
                ResponseTemplate::new(307)
                    .insert_header("location", "https://storage.example.com/blob?sig=1"),
            )
            .mount(&server)
            .await;

        let request = Request::builder()
            .uri("/v2/team/app/blobs/sha256:abc")
            .body(Body::empty())
            .unwrap();

        let response = proxy(&server).forward(request, "Bearer t").await.unwrap();
        assert_eq!(response.status(), 307);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "https://storage.example.com/blob?sig=1"
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_unavailable() {
        let proxy = BackendProxy::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            Duration::from_secs(1),
        );
        let request = Request::builder()
            .uri("/v2/team/app/manifests/latest")
            .body(Body::empty())
            .unwrap();

        let err = proxy.forward(request, "Bearer t").await.unwrap_err();
        assert!(matches!(
            err,
            GateError::UpstreamUnavailable(ref msg) if msg == "Server error encountered while handling request"
        ));
    }

    #[tokio::test]
    async fn test_client_is_built_once() {
        let proxy = BackendProxy::new(Url::parse("http://127.0.0.1:1").unwrap(), Duration::from_secs(1));
        let first = proxy.client().await.unwrap() as *const reqwest::Client;
        let second = proxy.client().await.unwrap() as *const reqwest::Client;
        assert_eq!(first, second);
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.append("x-multi", HeaderValue::from_static("1"));
        headers.append("x-multi", HeaderValue::from_static("2"));

        let stripped = strip_hop_by_hop(&headers);

        assert!(stripped.get("connection").is_none());
        assert!(stripped.get("keep-alive").is_none());
        assert!(stripped.get("transfer-encoding").is_none());
        assert!(stripped.get("x-session").is_none());
        assert_eq!(stripped.get("accept").unwrap(), "*/*");
        assert_eq!(stripped.get_all("x-multi").iter().count(), 2);
    }
}
