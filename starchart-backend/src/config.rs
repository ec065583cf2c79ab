use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::module::renderer::DEFAULT_TITLE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            catalog: CatalogConfig::default(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let config: BackendConfig = toml::from_str(&content)
            .context(format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that deserialize but cannot be used
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.ttl_hours > MAX_TTL_HOURS {
            bail!(
                "cache.ttl_hours = {} exceeds the maximum of {} (100 years)",
                self.cache.ttl_hours,
                MAX_TTL_HOURS
            );
        }
        Ok(())
    }

    /// Like `from_file`, but a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// `bundled`, `hipparcos`, a catalog file path, or an http(s) URL
    #[serde(default = "default_catalog_source")]
    pub source: String,

    /// Optional TOML file with Earth orientation parameters
    #[serde(default)]
    pub ephemeris: Option<PathBuf>,

    /// Where remote catalogs are downloaded to
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_catalog_source() -> String {
    "bundled".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data/catalog")
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: default_catalog_source(),
            ephemeris: None,
            download_dir: default_download_dir(),
        }
    }
}

/// Longest accepted cache TTL: 100 years
pub const MAX_TTL_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,

    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,

    /// Entries removed per write-lock acquisition during a sweep
    #[serde(default = "default_sweep_chunk_size")]
    pub sweep_chunk_size: usize,
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Memory
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/image_cache")
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_sweep_interval_minutes() -> u64 {
    60
}

fn default_sweep_chunk_size() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            directory: default_cache_dir(),
            ttl_hours: default_ttl_hours(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
            sweep_chunk_size: default_sweep_chunk_size(),
        }
    }
}

impl CacheConfig {
    /// Saturates at `MAX_TTL_HOURS` for configs built without `validate`
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours.min(MAX_TTL_HOURS) as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_minutes.max(1) * 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    #[serde(default = "default_storage_dir")]
    pub directory: PathBuf,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::File
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data/starmaps")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            directory: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Extra font faces loaded on top of the system fonts
    #[serde(default)]
    pub font_dir: Option<PathBuf>,

    #[serde(default = "default_title")]
    pub default_title: String,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_dir: None,
            default_title: default_title(),
        }
    }
}
