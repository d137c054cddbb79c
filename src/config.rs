//! Configuration management for the chunk cache

use crate::error::{ChunkCacheError, Result};
use crate::hot_tier::SlidingWindow;
use crate::wire::DEFAULT_BOUNDARY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration for the audio registry and its tiers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Hot (memory) tier budget in bytes (default: 50MB)
    #[serde(default = "default_hot_max_bytes")]
    pub hot_max_bytes: usize,

    /// Warm (persistent) tier budget in bytes (default: 200MB)
    #[serde(default = "default_warm_max_bytes")]
    pub warm_max_bytes: usize,

    /// Whether to enable the warm tier (default: true)
    #[serde(default = "default_true")]
    pub enable_warm_tier: bool,

    /// Warm tier backend type (default: "file")
    /// Options: "file" (filesystem-based) or "memory" (map-backed)
    #[serde(default = "default_warm_backend")]
    pub warm_backend: String,

    /// Warm tier directory for the "file" backend
    #[serde(default = "default_warm_dir")]
    pub warm_dir: String,

    /// Chunks protected behind the playing chunk in its paragraph (default: 15)
    #[serde(default = "default_window_before")]
    pub window_before: usize,

    /// Chunks protected ahead of the playing chunk in its paragraph (default: 25)
    #[serde(default = "default_window_ahead")]
    pub window_ahead: usize,

    /// Neighbouring paragraphs protected on each side (default: 2)
    #[serde(default = "default_paragraph_protection")]
    pub paragraph_protection: usize,

    /// Candidates taken from the hot tier per demotion round (default: 10)
    #[serde(default = "default_hot_eviction_batch")]
    pub hot_eviction_batch: usize,

    /// Candidates taken from the warm tier per discard round (default: 20)
    #[serde(default = "default_warm_eviction_batch")]
    pub warm_eviction_batch: usize,

    /// Paragraph capacity of the built-in cold fallback cache (default: 64)
    #[serde(default = "default_cold_max_paragraphs")]
    pub cold_max_paragraphs: usize,

    /// Multipart boundary token of the synthesis response stream
    #[serde(default = "default_boundary")]
    pub boundary: String,

    /// Provisional duration estimate per character when the wire carries none
    #[serde(default = "default_ms_per_char")]
    pub estimated_ms_per_char: f64,
}

// Default value functions for serde
fn default_hot_max_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

fn default_warm_max_bytes() -> usize {
    200 * 1024 * 1024 // 200MB
}

fn default_true() -> bool {
    true
}

fn default_warm_backend() -> String {
    "file".to_string()
}

fn default_warm_dir() -> String {
    "/var/cache/tts-chunk-cache".to_string()
}

fn default_window_before() -> usize {
    15
}

fn default_window_ahead() -> usize {
    25
}

fn default_paragraph_protection() -> usize {
    2
}

fn default_hot_eviction_batch() -> usize {
    10
}

fn default_warm_eviction_batch() -> usize {
    20
}

fn default_cold_max_paragraphs() -> usize {
    64
}

fn default_boundary() -> String {
    DEFAULT_BOUNDARY.to_string()
}

fn default_ms_per_char() -> f64 {
    80.0
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            hot_max_bytes: default_hot_max_bytes(),
            warm_max_bytes: default_warm_max_bytes(),
            enable_warm_tier: default_true(),
            warm_backend: default_warm_backend(),
            warm_dir: default_warm_dir(),
            window_before: default_window_before(),
            window_ahead: default_window_ahead(),
            paragraph_protection: default_paragraph_protection(),
            hot_eviction_batch: default_hot_eviction_batch(),
            warm_eviction_batch: default_warm_eviction_batch(),
            cold_max_paragraphs: default_cold_max_paragraphs(),
            boundary: default_boundary(),
            estimated_ms_per_char: default_ms_per_char(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(CacheConfig)` if loading and validation succeed
    /// * `Err(ChunkCacheError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ChunkCacheError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(content).map_err(|e| {
            ChunkCacheError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// A memory-only configuration (warm tier backed by a map)
    pub fn in_memory(hot_max_bytes: usize, warm_max_bytes: usize) -> Self {
        CacheConfig {
            hot_max_bytes,
            warm_max_bytes,
            warm_backend: "memory".to_string(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - hot_max_bytes must be > 0
    /// - warm_max_bytes must be > 0 when the warm tier is enabled
    /// - warm_backend must be "file" or "memory"; "file" needs a warm_dir
    /// - eviction batches must be > 0
    /// - cold_max_paragraphs must be > 0
    /// - boundary must be non-empty and free of CR/LF
    pub fn validate(&self) -> Result<()> {
        if self.hot_max_bytes == 0 {
            return Err(ChunkCacheError::ConfigError(
                "hot_max_bytes must be greater than 0".to_string(),
            ));
        }

        if self.enable_warm_tier {
            if self.warm_max_bytes == 0 {
                return Err(ChunkCacheError::ConfigError(
                    "warm_max_bytes must be greater than 0 when the warm tier is enabled"
                        .to_string(),
                ));
            }

            match self.warm_backend.as_str() {
                "file" => {
                    if self.warm_dir.trim().is_empty() {
                        return Err(ChunkCacheError::ConfigError(
                            "warm_dir is required when warm_backend is 'file'".to_string(),
                        ));
                    }
                }
                "memory" => {}
                other => {
                    return Err(ChunkCacheError::ConfigError(format!(
                        "Invalid warm_backend '{}', must be 'file' or 'memory'",
                        other
                    )));
                }
            }
        }

        if self.hot_eviction_batch == 0 || self.warm_eviction_batch == 0 {
            return Err(ChunkCacheError::ConfigError(
                "eviction batch sizes must be greater than 0".to_string(),
            ));
        }

        if self.cold_max_paragraphs == 0 {
            return Err(ChunkCacheError::ConfigError(
                "cold_max_paragraphs must be greater than 0".to_string(),
            ));
        }

        if self.boundary.is_empty() || self.boundary.contains(['\r', '\n']) {
            return Err(ChunkCacheError::ConfigError(format!(
                "boundary must be a non-empty single-line token, got {:?}",
                self.boundary
            )));
        }

        if self.estimated_ms_per_char.is_nan() || self.estimated_ms_per_char < 0.0 {
            return Err(ChunkCacheError::ConfigError(
                "estimated_ms_per_char must be a non-negative number".to_string(),
            ));
        }

        Ok(())
    }

    /// Sliding-window protection parameters for the hot tier
    pub fn sliding_window(&self) -> SlidingWindow {
        SlidingWindow {
            before: self.window_before,
            ahead: self.window_ahead,
            paragraph_radius: self.paragraph_protection,
        }
    }
}
