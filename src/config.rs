//! Flash attention configuration types.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tiling configuration for the flash attention forward pass.
///
/// Tile sizes trade parallelism granularity against per-tile working set.
/// They never change the result beyond floating-point rounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashAttentionConfig {
    /// Number of query rows per tile
    #[serde(default = "default_tile_size")]
    pub query_tile_size: usize,

    /// Number of key/value rows per tile
    #[serde(default = "default_tile_size")]
    pub key_tile_size: usize,

    /// Run independent (batch, head, query-tile) units on the rayon pool
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

/// Tile size along both sequence dimensions when none is configured.
pub const DEFAULT_TILE_SIZE: usize = 128;

fn default_tile_size() -> usize {
    DEFAULT_TILE_SIZE
}

fn default_parallel() -> bool {
    true
}

impl Default for FlashAttentionConfig {
    fn default() -> Self {
        Self {
            query_tile_size: DEFAULT_TILE_SIZE,
            key_tile_size: DEFAULT_TILE_SIZE,
            parallel: true,
        }
    }
}

impl FlashAttentionConfig {
    pub fn with_query_tile_size(mut self, size: usize) -> Self {
        self.query_tile_size = size;
        self
    }

    pub fn with_key_tile_size(mut self, size: usize) -> Self {
        self.key_tile_size = size;
        self
    }

    /// Set both tile sizes at once.
    pub fn with_tile_sizes(self, query: usize, key: usize) -> Self {
        self.with_query_tile_size(query).with_key_tile_size(key)
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.query_tile_size == 0 {
            return Err(Error::ConfigError {
                reason: "query_tile_size must be > 0".into(),
            });
        }
        if self.key_tile_size == 0 {
            return Err(Error::ConfigError {
                reason: "key_tile_size must be > 0".into(),
            });
        }
        Ok(())
    }
}
