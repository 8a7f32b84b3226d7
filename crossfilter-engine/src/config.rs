use anyhow::{Context, Result};
use crossfilter_core::backend::PoolConfig;
use crossfilter_core::{
    CrossfilterError, CrossfilterResult, DimensionConfig, View, ViewConfig, ViewRegistry,
    MAX_CUBE_RESOLUTION,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Configuration for the cross-filter engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dimensions available to views
    pub dimensions: Vec<DimensionConfig>,

    /// Views in display order; a view's position is its id
    pub views: Vec<ViewConfig>,

    /// Width used for views that do not declare one
    pub default_view_width: usize,

    /// Cube cache configuration
    pub cache: CacheConfig,

    /// Backend connection configuration
    pub backend: BackendConfig,
}

/// How many boundaries a cube sweeps across the active dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// One boundary per pixel of the active view
    PixelWidth,
    /// Same resolution for every active view
    Fixed(usize),
}

/// Cube cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve brushes from cubes; off means baseline mode
    pub enable_caching: bool,

    /// Build cubes as soon as a view is hovered
    pub preload_on_activation: bool,

    /// Resolution policy
    pub resolution: ResolutionPolicy,

    /// Upper bound on resolution
    pub max_resolution: usize,

    /// Retry a retriable cube failure once before giving up on the view
    pub retry_failed_build: bool,
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Use prepared statement templates
    pub use_prepared_statements: bool,

    /// Compress request and response bodies
    pub enable_compression: bool,

    /// Query timeout in milliseconds
    pub query_timeout_ms: u64,

    /// SQL-over-HTTP endpoint; the in-process backend is used when absent
    pub endpoint: Option<String>,

    /// Table holding the dataset
    pub table: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimensions: Vec::new(),
            views: Vec::new(),
            default_view_width: 400,
            cache: CacheConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            preload_on_activation: true,
            resolution: ResolutionPolicy::PixelWidth,
            max_resolution: 2048,
            retry_failed_build: true,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            use_prepared_statements: true,
            enable_compression: true,
            query_timeout_ms: 10_000, // 10 seconds
            endpoint: None,
            table: "flights".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `CROSSFILTER_CONFIG` (if set), then environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match env::var("CROSSFILTER_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        // Override with environment variables if present
        if let Ok(enable) = env::var("CROSSFILTER_ENABLE_CACHING") {
            config.cache.enable_caching = enable.parse()?;
        }

        if let Ok(preload) = env::var("CROSSFILTER_PRELOAD") {
            config.cache.preload_on_activation = preload.parse()?;
        }

        if let Ok(resolution) = env::var("CROSSFILTER_RESOLUTION") {
            config.cache.resolution = match resolution.trim() {
                "pixel_width" | "pixels" => ResolutionPolicy::PixelWidth,
                fixed => ResolutionPolicy::Fixed(
                    fixed
                        .parse()
                        .with_context(|| format!("Invalid CROSSFILTER_RESOLUTION '{}'", fixed))?,
                ),
            };
        }

        if let Ok(max_connections) = env::var("CROSSFILTER_MAX_CONNECTIONS") {
            config.backend.max_connections = max_connections.parse()?;
        }

        if let Ok(prepared) = env::var("CROSSFILTER_PREPARED_STATEMENTS") {
            config.backend.use_prepared_statements = prepared.parse()?;
        }

        if let Ok(compression) = env::var("CROSSFILTER_COMPRESSION") {
            config.backend.enable_compression = compression.parse()?;
        }

        if let Ok(timeout) = env::var("CROSSFILTER_QUERY_TIMEOUT_MS") {
            config.backend.query_timeout_ms = timeout.parse()?;
        }

        if let Ok(endpoint) = env::var("CROSSFILTER_ENDPOINT") {
            config.backend.endpoint = Some(endpoint);
        }

        if let Ok(table) = env::var("CROSSFILTER_TABLE") {
            config.backend.table = table;
        }

        Ok(config)
    }

    /// Parse the declarative JSON form
    pub fn from_json_str(json: &str) -> CrossfilterResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> CrossfilterResult<()> {
        if self.backend.max_connections == 0 {
            return Err(CrossfilterError::configuration(
                "Max connections must be greater than 0",
            ));
        }

        if self.backend.query_timeout_ms == 0 {
            return Err(CrossfilterError::configuration(
                "Query timeout must be greater than 0",
            ));
        }

        if self.backend.table.trim().is_empty() {
            return Err(CrossfilterError::configuration("Table name cannot be empty"));
        }

        if self.cache.max_resolution == 0 || self.cache.max_resolution > MAX_CUBE_RESOLUTION {
            return Err(CrossfilterError::configuration(format!(
                "Max resolution must be between 1 and {}",
                MAX_CUBE_RESOLUTION
            )));
        }

        if self.cache.resolution == ResolutionPolicy::Fixed(0) {
            return Err(CrossfilterError::configuration(
                "Fixed resolution must be greater than 0",
            ));
        }

        self.registry().map(|_| ())
    }

    /// Build the validated dimension/view registry
    pub fn registry(&self) -> CrossfilterResult<ViewRegistry> {
        ViewRegistry::from_config(&self.dimensions, &self.views, self.default_view_width)
    }

    /// Cube resolution used while `view` is active
    pub fn resolution_for(&self, view: &View) -> usize {
        let requested = match self.cache.resolution {
            ResolutionPolicy::PixelWidth => view.width().unwrap_or(self.default_view_width),
            ResolutionPolicy::Fixed(resolution) => resolution,
        };
        requested.clamp(1, self.cache.max_resolution.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.query_timeout_ms)
    }

    /// Settings for the pooled remote backend
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.backend.max_connections,
            query_timeout: self.query_timeout(),
            use_prepared_statements: self.backend.use_prepared_statements,
            table: self.backend.table.clone(),
        }
    }
}
