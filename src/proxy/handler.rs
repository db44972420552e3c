use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use http::header::HeaderValue;
use http::uri::Uri;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::ext::ReasonPhrase;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use url::Url;

use super::strip_hop_by_hop;
use crate::gateway::{Gateway, GatewayRequest, GatewayResponse};

/// Control endpoint carrying message signals from the hosting page.
pub const CONTROL_MESSAGE_PATH: &str = "/__gateway/message";
/// Response header naming where the body came from.
pub const SOURCE_HEADER: &str = "x-gateway-source";

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Maps a request target onto the origin. Absolute-form targets are kept
/// as they are.
pub fn request_url(origin: &Url, uri: &Uri) -> Result<Url, url::ParseError> {
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string());
    }
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}

fn into_response(served: GatewayResponse) -> Response<Full<Bytes>> {
    let snapshot = served.response;
    let mut response = Response::new(Full::new(snapshot.body));
    *response.status_mut() = snapshot.status;
    *response.headers_mut() = snapshot.headers;
    strip_hop_by_hop(response.headers_mut());
    response.headers_mut().insert(
        SOURCE_HEADER,
        HeaderValue::from_static(served.source.as_str()),
    );

    if let Some(reason) = snapshot.reason {
        match ReasonPhrase::try_from(reason.into_bytes()) {
            Ok(reason) => {
                response.extensions_mut().insert(reason);
            }
            Err(e) => debug!(error = %e, "dropping invalid reason phrase"),
        }
    }
    response
}

async fn handle_control_message<B>(
    req: Request<B>,
    gateway: Arc<Gateway>,
    tracker: TaskTracker,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let data = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read message body");
            return status_response(StatusCode::BAD_REQUEST);
        }
    };

    debug!(bytes = data.len(), "message received");
    tracker.spawn(async move {
        gateway.handle_message(&data).await;
    });
    status_response(StatusCode::ACCEPTED)
}

/// Turns one proxied HTTP request into a fetch signal, or a control
/// request into a message signal.
pub async fn handle_request<B>(
    req: Request<B>,
    gateway: Arc<Gateway>,
    tracker: TaskTracker,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Display,
{
    if req.method() == Method::POST && req.uri().path() == CONTROL_MESSAGE_PATH {
        return Ok(handle_control_message(req, gateway, tracker).await);
    }

    let url = match request_url(gateway.origin(), req.uri()) {
        Ok(url) => url,
        Err(e) => {
            warn!(uri = %req.uri(), error = %e, "invalid request target");
            return Ok(status_response(StatusCode::BAD_REQUEST));
        }
    };

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(url = %url, error = %e, "failed to read request body");
            return Ok(status_response(StatusCode::BAD_REQUEST));
        }
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    let request = GatewayRequest {
        method: parts.method,
        url,
        headers,
        body,
    };

    match gateway.handle_fetch(request).await {
        Ok(served) => Ok(into_response(served)),
        Err(e) => {
            warn!(error = %e, "upstream request failed");
            Ok(status_response(StatusCode::BAD_GATEWAY))
        }
    }
}
