use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use hyper::ext::ReasonPhrase;
use reqwest::redirect::Policy;
use tracing::trace;

use super::strip_for_upstream;
use crate::cache::ResponseSnapshot;
use crate::error::FetchError;
use crate::gateway::GatewayRequest;

/// The network as seen by the gateway.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Any HTTP status is a successful fetch; only transport failures are
    /// errors.
    async fn fetch(&self, request: &GatewayRequest) -> Result<ResponseSnapshot, FetchError>;
}

/// Upstream client for http and https origins. Applies no request timeout
/// of its own; only connection establishment can be bounded. Redirects are
/// handed back to the client untouched.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .no_proxy();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

fn create_request(
    client: &reqwest::Client,
    request: &GatewayRequest,
) -> Result<reqwest::Request, FetchError> {
    if !matches!(request.url.scheme(), "http" | "https") {
        return Err(FetchError::UnsupportedScheme(request.url.scheme().to_string()));
    }

    let mut headers = request.headers.clone();
    strip_for_upstream(&mut headers);

    Ok(client
        .request(request.method.clone(), request.url.clone())
        .headers(headers)
        .body(request.body.clone())
        .build()?)
}

fn custom_reason(status: StatusCode, reason: Option<&ReasonPhrase>) -> Option<String> {
    let reason = String::from_utf8_lossy(reason?.as_bytes()).into_owned();
    if status.canonical_reason() == Some(reason.as_str()) {
        None
    } else {
        Some(reason)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &GatewayRequest) -> Result<ResponseSnapshot, FetchError> {
        let upstream = create_request(&self.client, request)?;
        let response = self.client.execute(upstream).await?;

        let status = response.status();
        let reason = custom_reason(status, response.extensions().get::<ReasonPhrase>());
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        trace!(
            url = %request.url,
            status = %status,
            bytes = body.len(),
            "upstream response"
        );

        Ok(ResponseSnapshot {
            status,
            reason,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCEPT, HOST};
    use http::{HeaderValue, Method};
    use url::Url;

    fn client() -> reqwest::Client {
        HttpFetcher::new(None).unwrap().client
    }

    #[test]
    fn test_create_request_strips_gateway_headers() {
        let request = GatewayRequest::new(
            Method::GET,
            Url::parse("http://127.0.0.1:5006/media/a.jpg?v=2").unwrap(),
        )
        .header(HOST, HeaderValue::from_static("gateway:3000"))
        .header(ACCEPT, HeaderValue::from_static("image/*"));

        let upstream = create_request(&client(), &request).unwrap();
        assert_eq!(upstream.url().as_str(), "http://127.0.0.1:5006/media/a.jpg?v=2");
        assert!(upstream.headers().get(HOST).is_none());
        assert_eq!(upstream.headers().get(ACCEPT).unwrap(), "image/*");
    }

    #[test]
    fn test_https_upstreams_are_accepted() {
        let request = GatewayRequest::get(Url::parse("https://cdn.example.com/media/a.jpg").unwrap());
        let upstream = create_request(&client(), &request).unwrap();
        assert_eq!(upstream.url().scheme(), "https");
        assert_eq!(upstream.method(), &Method::GET);
    }

    #[test]
    fn test_non_http_schemes_are_rejected() {
        let request = GatewayRequest::get(Url::parse("ftp://example.com/a.png").unwrap());
        assert!(matches!(
            create_request(&client(), &request),
            Err(FetchError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
    }

    #[test]
    fn test_custom_reason_only_when_non_canonical() {
        let canonical = ReasonPhrase::from_static(b"OK");
        let custom = ReasonPhrase::from_static(b"Fine Thanks");
        assert_eq!(custom_reason(StatusCode::OK, Some(&canonical)), None);
        assert_eq!(
            custom_reason(StatusCode::OK, Some(&custom)).as_deref(),
            Some("Fine Thanks")
        );
        assert_eq!(custom_reason(StatusCode::OK, None), None);
    }
}
