//! Media cache gateway for the BulutVizyon web application.
//!
//! The gateway sits between the browser and the application origin. Media
//! (images and video) is served cache-first from a persistent store with an
//! offline fallback, other static assets are served from cache when
//! present, and API and HTML traffic always goes to the network.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod proxy;

pub use config::GatewayConfig;
pub use error::{CacheError, FetchError, GatewayError, LifecycleError};
pub use gateway::{Gateway, GatewayRequest, GatewayResponse, ResponseSource};
