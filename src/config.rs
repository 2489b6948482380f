//! Configuration System
//!
//! Ambient engine defaults loaded from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (ACTIVARA_* prefix)
//!
//! These are tuning dials, not problem physics: the problem description file
//! (see [`crate::problem`]) carries everything that defines a calculation.
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [cache]
//! capacity = 64
//!
//! [numerics]
//! degenerate_tolerance = 1e-3
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! ACTIVARA_CACHE__CAPACITY=128
//! ACTIVARA_NUMERICS__DEGENERATE_TOLERANCE=1e-4
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub numerics: NumericsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reaction-rate cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of base nuclides each per-flux rate cache holds
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

/// Chain storage tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Initial rank capacity of the chain arena; grows by doubling and
    /// shrinks when utilisation falls below a quarter
    #[serde(default = "default_initial_chain")]
    pub initial_capacity: usize,
}

/// Numerical tolerances for the matrix kernels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericsConfig {
    /// Relative closeness at which two rates are treated as a repeated pole
    /// and the element is routed to Laplace inversion
    #[serde(default = "default_degenerate_tolerance")]
    pub degenerate_tolerance: f64,

    /// Magnitude below which a negative matrix element is considered
    /// round-off and clamped to zero; anything more negative is fatal
    #[serde(default = "default_negative_clamp")]
    pub negative_clamp: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_cache_capacity() -> usize {
    64
}
fn default_initial_chain() -> usize {
    4
}
fn default_degenerate_tolerance() -> f64 {
    1e-3
}
fn default_negative_clamp() -> f64 {
    1e-9
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            initial_capacity: default_initial_chain(),
        }
    }
}

impl Default for NumericsConfig {
    fn default() -> Self {
        NumericsConfig {
            degenerate_tolerance: default_degenerate_tolerance(),
            negative_clamp: default_negative_clamp(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (ACTIVARA_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("ACTIVARA_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ACTIVARA_").split("__"))
            .extract()
    }
}
