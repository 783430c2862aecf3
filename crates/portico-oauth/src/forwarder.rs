//! Authenticated forwarding to the upstream API.
//!
//! Each inbound request is replayed against the configured upstream with
//! the session's access token as a bearer credential. Browser cookies never
//! cross the hop. Bodies are streamed in both directions.

use axum::body::{Body, HttpBody};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, header};
use futures::TryStreamExt;
use reqwest::Client;
use url::Url;

use crate::error::ProxyError;

/// Headers that describe a single connection and never cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards requests to a single upstream base URL.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    upstream: Url,
}

impl Forwarder {
    /// Create a forwarder for `upstream` (e.g. `https://api.example.com`).
    pub fn new(client: Client, upstream: &str) -> Result<Self, ProxyError> {
        let upstream = Url::parse(upstream)
            .map_err(|e| ProxyError::InvalidUpstream(format!("{}: {}", upstream, e)))?;
        if upstream.cannot_be_a_base() || upstream.host_str().is_none() {
            return Err(ProxyError::InvalidUpstream(format!(
                "{} is not a base URL",
                upstream
            )));
        }
        Ok(Self { client, upstream })
    }

    /// Builder for the upstream client.
    ///
    /// Redirects are relayed to the caller as-is, never followed.
    pub fn client_builder() -> reqwest::ClientBuilder {
        Client::builder().redirect(reqwest::redirect::Policy::none())
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Upstream URL for an inbound path and query.
    pub fn target_url(&self, path_and_query: &str) -> Result<Url, ProxyError> {
        let base = self.upstream.as_str().trim_end_matches('/');
        let suffix = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{}", path_and_query)
        };
        Url::parse(&format!("{}{}", base, suffix))
            .map_err(|e| ProxyError::InvalidUpstream(e.to_string()))
    }

    /// Forward `request` upstream and relay the response.
    ///
    /// `access_token` is attached as `authorization: bearer <token>` when
    /// present and non-empty; otherwise no authorization header is sent.
    /// Dropping the returned future or response body aborts the upstream
    /// exchange.
    pub async fn forward(
        &self,
        request: Request<Body>,
        access_token: Option<&str>,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = self.target_url(path_and_query)?;

        tracing::info!(
            "{} -> {}://{}{}",
            parts.uri.path(),
            target.scheme(),
            target.host_str().unwrap_or_default(),
            target.path()
        );

        let headers = outbound_headers(&parts.headers, access_token);

        let mut upstream_request = self
            .client
            .request(parts.method, target)
            .headers(headers);
        if !body.is_end_stream() {
            upstream_request =
                upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream_response = upstream_request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Upstream request failed");
            ProxyError::from(e)
        })?;

        let status = upstream_response.status();
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let stream = upstream_response
            .bytes_stream()
            .map_err(std::io::Error::other);

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Inbound headers rewritten for the upstream hop.
fn outbound_headers(inbound: &HeaderMap, access_token: Option<&str>) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);

    // Host is derived from the target URL.
    headers.remove(header::HOST);
    headers.remove(header::COOKIE);
    headers.remove(header::AUTHORIZATION);

    if let Some(token) = access_token.filter(|t| !t.is_empty())
        && let Ok(value) = HeaderValue::from_str(&format!("bearer {}", token))
    {
        headers.insert(header::AUTHORIZATION, value);
    }

    headers
}

/// Remove hop-by-hop headers, including any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
