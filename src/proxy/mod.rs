mod fetcher;
mod handler;
mod server;

pub use fetcher::*;
pub use handler::*;
pub use server::*;

use http::header::{
    HeaderName, CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use http::HeaderMap;

/// Headers scoped to a single hop; never forwarded in either direction.
static HOP_BY_HOP: [HeaderName; 7] = [
    CONNECTION,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// The client's `Host` names the gateway, not the upstream.
pub(crate) fn strip_for_upstream(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.remove(HOST);
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCEPT, HeaderValue};

    #[test]
    fn test_strip_for_upstream() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("gateway:3000"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(ACCEPT, HeaderValue::from_static("image/*"));

        strip_for_upstream(&mut headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(ACCEPT).unwrap(), "image/*");
    }
}
