//! Request transports.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::{Method, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use crate::client::ClientConfig;
use crate::error::{ErrorCode, SdkError, SdkResult};
use crate::wire::{Request, Response};

/// Sends one GraphQL request and returns its decoded response.
///
/// Implementations do not retry; the client does.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> SdkResult<Response>;
}

/// GraphQL over HTTP POST, with TLS for `https` URLs.
///
/// Server certificates are verified against the Mozilla root store.
#[derive(Clone)]
pub struct HttpTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    uri: Uri,
    headers: Vec<(HeaderName, HeaderValue)>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("uri", &self.uri)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> SdkResult<Self> {
        let uri: Uri = config.url.trim().parse().map_err(|e| {
            SdkError::new(ErrorCode::InvalidUrl, format!("invalid url `{}`: {e}", config.url))
        })?;
        if !matches!(uri.scheme_str(), Some("http" | "https")) || uri.host().is_none() {
            return Err(SdkError::new(
                ErrorCode::InvalidUrl,
                format!("url `{}` must be absolute http or https", config.url),
            ));
        }

        let mut headers = Vec::with_capacity(config.headers.len());
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                SdkError::new(ErrorCode::InvalidHeader, format!("invalid header name `{key}`: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SdkError::new(ErrorCode::InvalidHeader, format!("invalid value for `{key}`: {e}"))
            })?;
            headers.push((name, value));
        }

        let connector = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|e| SdkError::new(ErrorCode::TlsError, format!("failed to configure TLS: {e}")))?
            .https_or_http()
            .enable_http1()
            .build();
        let client = HyperClient::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            uri,
            headers,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> SdkResult<Response> {
        let body = serde_json::to_vec(request).map_err(|e| SdkError::serialize(e.to_string()))?;

        let mut builder = hyper::Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let http_request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SdkError::internal(format!("failed to build request: {e}")))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(http_request))
            .await
            .map_err(|_| SdkError::timeout())?
            .map_err(|e| {
                if e.is_connect() {
                    SdkError::new(ErrorCode::ConnectionRefused, format!("connection failed: {e}"))
                } else {
                    SdkError::network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = tokio::time::timeout(self.timeout, response.into_body().collect())
            .await
            .map_err(|_| SdkError::timeout())?
            .map_err(|e| SdkError::network(format!("failed to read response: {e}")))?
            .to_bytes();

        if !status.is_success() {
            // Servers may report GraphQL errors with a non-2xx status.
            if let Ok(parsed) = serde_json::from_slice::<Response>(&body) {
                if !parsed.errors.is_empty() {
                    return Ok(parsed);
                }
            }
            return Err(status_error(status));
        }

        serde_json::from_slice(&body).map_err(|e| {
            let preview = String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned();
            SdkError::new(ErrorCode::InvalidResponse, format!("invalid response body: {e}"))
                .with_extension("body", preview)
        })
    }
}

fn status_error(status: StatusCode) -> SdkError {
    let code = match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ErrorCode::ServiceUnavailable
        }
        _ => ErrorCode::HttpError,
    };
    SdkError::new(code, format!("HTTP {status}")).with_extension("status", status.as_u16())
}
