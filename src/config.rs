use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default lower bound for chunk sizes, in tokens.
pub const CHUNK_MIN_SIZE: usize = 475;
/// Default chunk size targeted when splitting documents.
pub const CHUNK_DEFAULT_SIZE: usize = 500;
/// Default tolerated relative difference between a cached chunk size and a
/// requested one before the cache entry counts as stale.
pub const CHUNK_MAX_DIFFERENTIAL: f64 = 0.05;
/// Default minimum total word count a training corpus must reach.
pub const MIN_CORPUS_WORD_COUNT: usize = 3500;

/// Engine configuration surface.
///
/// All fields have serde defaults, so a partial configuration document
/// deserializes into a fully populated config. `validate` fails fast on
/// degenerate bounds before any extraction or training work starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether the chunk cache stores extraction results at all.
    pub cache_enabled: bool,
    /// Whether training documents are split into size-bounded chunks.
    pub chunk_documents: bool,
    pub chunk_min_size: usize,
    pub chunk_default_size: usize,
    /// Upper bound on chunk sizes. `None` leaves chunks unbounded above.
    pub chunk_max_size: Option<usize>,
    pub chunk_max_differential: f64,
    pub min_corpus_word_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            chunk_documents: true,
            chunk_min_size: CHUNK_MIN_SIZE,
            chunk_default_size: CHUNK_DEFAULT_SIZE,
            chunk_max_size: None,
            chunk_max_differential: CHUNK_MAX_DIFFERENTIAL,
            min_corpus_word_count: MIN_CORPUS_WORD_COUNT,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_min_size > self.chunk_default_size {
            return Err(ConfigError::ChunkMinAboveTarget {
                min: self.chunk_min_size,
                target: self.chunk_default_size,
            });
        }
        if let Some(max) = self.chunk_max_size {
            if self.chunk_default_size > max {
                return Err(ConfigError::ChunkTargetAboveMax {
                    target: self.chunk_default_size,
                    max,
                });
            }
        }
        if !self.chunk_max_differential.is_finite() || self.chunk_max_differential < 0.0 {
            return Err(ConfigError::BadDifferential(self.chunk_max_differential));
        }
        Ok(())
    }
}
