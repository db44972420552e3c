use http::header::ACCEPT;
use http::{HeaderMap, Method};
use url::Url;

use crate::config::{DEFAULT_API_PREFIX, DEFAULT_MEDIA_EXTENSIONS, DEFAULT_MEDIA_PREFIX};

const HTML_MEDIA_TYPE: &str = "text/html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Cache-first in the media store with offline fallback.
    Media,
    /// Under the API prefix. Never cached.
    Api,
    /// Accepts HTML. Never cached.
    Html,
    /// Any other GET: cache-first across all stores, no write-back.
    Static,
    /// Non-GET requests, passed through untouched.
    Bypass,
}

impl RequestClass {
    pub fn is_intercepted(self) -> bool {
        matches!(self, RequestClass::Media | RequestClass::Static)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestClass::Media => "media",
            RequestClass::Api => "api",
            RequestClass::Html => "html",
            RequestClass::Static => "static",
            RequestClass::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    media_prefix: String,
    api_prefix: String,
    media_extensions: Vec<String>,
}

impl Classifier {
    pub fn new(media_prefix: String, api_prefix: String, media_extensions: Vec<String>) -> Self {
        Self {
            media_prefix,
            api_prefix,
            media_extensions,
        }
    }

    /// API and HTML win over a media-looking path; only GETs are ever cached.
    pub fn classify(&self, method: &Method, url: &Url, headers: &HeaderMap) -> RequestClass {
        let path = url.path();
        if path.starts_with(&self.api_prefix) {
            RequestClass::Api
        } else if accepts_html(headers) {
            RequestClass::Html
        } else if method != Method::GET {
            RequestClass::Bypass
        } else if self.is_media_path(path) {
            RequestClass::Media
        } else {
            RequestClass::Static
        }
    }

    /// Extension matching is case-sensitive.
    fn is_media_path(&self, path: &str) -> bool {
        path.starts_with(&self.media_prefix)
            || self
                .media_extensions
                .iter()
                .any(|ext| path.ends_with(ext.as_str()))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_MEDIA_PREFIX.to_string(),
            DEFAULT_API_PREFIX.to_string(),
            DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        )
    }
}

pub fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains(HTML_MEDIA_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn classify(method: Method, path: &str, accept: Option<&'static str>) -> RequestClass {
        let url = Url::parse("http://localhost:5006").unwrap().join(path).unwrap();
        let mut headers = HeaderMap::new();
        if let Some(accept) = accept {
            headers.insert(ACCEPT, HeaderValue::from_static(accept));
        }
        Classifier::default().classify(&method, &url, &headers)
    }

    #[test]
    fn test_media_by_prefix_or_extension() {
        assert_eq!(classify(Method::GET, "/media/clip", None), RequestClass::Media);
        assert_eq!(classify(Method::GET, "/uploads/a.jpeg", Some("image/*")), RequestClass::Media);
        assert_eq!(classify(Method::GET, "/static/v.webm?t=3", None), RequestClass::Media);
    }

    #[test]
    fn test_extension_match_is_case_sensitive() {
        assert_eq!(classify(Method::GET, "/uploads/A.JPG", None), RequestClass::Static);
    }

    #[test]
    fn test_api_and_html_override_media() {
        assert_eq!(classify(Method::GET, "/api/media/a.png", None), RequestClass::Api);
        assert_eq!(classify(Method::POST, "/api/upload", None), RequestClass::Api);
        assert_eq!(
            classify(Method::GET, "/media/a.png", Some("text/html,application/xhtml+xml")),
            RequestClass::Html
        );
    }

    #[test]
    fn test_static_and_bypass() {
        assert_eq!(classify(Method::GET, "/static/styles.css", Some("text/css")), RequestClass::Static);
        assert_eq!(classify(Method::POST, "/media/a.jpg", None), RequestClass::Bypass);
        assert_eq!(classify(Method::HEAD, "/static/app.js", None), RequestClass::Bypass);
    }

    #[test]
    fn test_only_media_and_static_are_intercepted() {
        assert!(RequestClass::Media.is_intercepted());
        assert!(RequestClass::Static.is_intercepted());
        assert!(!RequestClass::Api.is_intercepted());
        assert!(!RequestClass::Html.is_intercepted());
        assert!(!RequestClass::Bypass.is_intercepted());
    }
}
