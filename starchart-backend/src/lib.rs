///! StarChart backend
///!
///! Computes, renders and caches sky-map images for an observer at a given
///! place and time.
///!
///! ## Layout
///! - `model`: observation requests, fingerprints, archived artifacts
///! - `module::sky`: catalog loading, ephemeris, positions, projection
///! - `module::renderer`: SVG scene and PNG rasterization
///! - `module::cache`: ephemeral render cache with single-flight generation
///! - `module::storage`: permanent artifact archive and its backends
///! - `module::janitor`: periodic eviction of expired cache entries
///! - `service`: facade used by the HTTP adapter in `http`

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod model;
pub mod module;
pub mod service;

pub use error::{StarChartError, StarChartResult};
pub use service::StarChartService;
