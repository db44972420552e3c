use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::cache::{StoreOptions, CACHE_DIR};
use crate::gateway::Classifier;

pub const DEFAULT_STORE_PREFIX: &str = "bulutvizyon";
pub const DEFAULT_CACHE_VERSION: &str = "v1";
pub const DEFAULT_MEDIA_PREFIX: &str = "/media/";
pub const DEFAULT_API_PREFIX: &str = "/api/";
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".mp4", ".webm"];
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// The two stores the gateway owns. Bumping the version renames both, so the
/// next activation drops everything cached under the old names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
    pub general: String,
    pub media: String,
}

impl StoreNames {
    pub fn new(prefix: &str, version: &str) -> Self {
        Self {
            general: format!("{prefix}-cache-{version}"),
            media: format!("{prefix}-media-cache-{version}"),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        name == self.general || name == self.media
    }
}

impl Default for StoreNames {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_PREFIX, DEFAULT_CACHE_VERSION)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Application origin; relative URLs and proxied paths resolve against it.
    pub origin: Url,
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub cache_dir: PathBuf,
    pub store_prefix: String,
    pub cache_version: String,
    pub store: StoreOptions,
    pub media_prefix: String,
    pub api_prefix: String,
    pub media_extensions: Vec<String>,
    /// URLs warmed into the general store on install. Empty by default.
    pub warm_urls: Vec<String>,
    pub connect_timeout: Option<Duration>,
}

impl GatewayConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cache_dir: PathBuf::from(CACHE_DIR),
            store_prefix: DEFAULT_STORE_PREFIX.to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            store: StoreOptions::default(),
            media_prefix: DEFAULT_MEDIA_PREFIX.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            media_extensions: DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            warm_urls: Vec::new(),
            connect_timeout: None,
        }
    }

    pub fn store_names(&self) -> StoreNames {
        StoreNames::new(&self.store_prefix, &self.cache_version)
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(
            self.media_prefix.clone(),
            self.api_prefix.clone(),
            self.media_extensions.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_names_are_versioned() {
        let names = StoreNames::default();
        assert_eq!(names.general, "bulutvizyon-cache-v1");
        assert_eq!(names.media, "bulutvizyon-media-cache-v1");
        assert!(names.contains("bulutvizyon-media-cache-v1"));
        assert!(!StoreNames::new("bulutvizyon", "v2").contains("bulutvizyon-cache-v1"));
    }
}
