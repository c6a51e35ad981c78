pub mod cache;

use crate::config::EngineConfig;
use crate::error::ConfigError;

/// Splits document text into size-bounded chunks so long documents do not
/// dominate training.
///
/// Sizes are counted in whitespace-delimited tokens. Chunks are at least
/// `min_size` and at most `max_size` (when bounded) tokens; the trailing
/// fragment merges into the previous chunk when it would fall below the
/// minimum, unless the merge would break the upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    min_size: usize,
    target_size: usize,
    max_size: Option<usize>,
}

impl Chunker {
    pub fn new(min_size: usize, target_size: usize, max_size: Option<usize>) -> Result<Self, ConfigError> {
        if min_size > target_size {
            return Err(ConfigError::ChunkMinAboveTarget {
                min: min_size,
                target: target_size,
            });
        }
        if let Some(max) = max_size {
            if target_size > max {
                return Err(ConfigError::ChunkTargetAboveMax {
                    target: target_size,
                    max,
                });
            }
        }
        Ok(Self {
            min_size,
            target_size,
            max_size,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(config.chunk_min_size, config.chunk_default_size, config.chunk_max_size)
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// Chunk at the configured target size.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        self.split(text, self.target_size)
    }

    /// Chunk at an explicit target size, which must lie within the
    /// configured bounds.
    pub fn chunk_with(&self, text: &str, target_size: usize) -> Result<Vec<String>, ConfigError> {
        let max = self.max_size.unwrap_or(usize::MAX);
        if target_size < self.min_size || target_size > max {
            return Err(ConfigError::ChunkSizeOutOfBounds {
                size: target_size,
                min: self.min_size,
                max,
            });
        }
        Ok(self.split(text, target_size))
    }

    fn split(&self, text: &str, target_size: usize) -> Vec<String> {
        let mut chunks: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for word in text.split_whitespace() {
            current.push(word);
            if current.len() >= target_size {
                chunks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            let below_min = current.len() < self.min_size;
            match chunks.last_mut() {
                Some(last) if below_min && self.fits(last.len() + current.len()) => {
                    last.extend(current);
                }
                // a whole document below the minimum still yields one chunk
                _ => chunks.push(current),
            }
        }
        chunks.into_iter().map(|words| words.join(" ")).collect()
    }

    fn fits(&self, size: usize) -> bool {
        self.max_size.map_or(true, |max| size <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn sizes(chunks: &[String]) -> Vec<usize> {
        chunks.iter().map(|chunk| chunk.split_whitespace().count()).collect()
    }

    #[test]
    fn trailing_fragment_merges_into_previous_chunk() {
        let chunker = Chunker::new(3, 5, None).expect("chunker");
        let chunks = chunker.chunk(&words(12));
        assert_eq!(sizes(&chunks), vec![5, 7]);
    }

    #[test]
    fn trailing_fragment_stands_alone_when_merge_breaks_the_bound() {
        let chunker = Chunker::new(3, 5, Some(5)).expect("chunker");
        let chunks = chunker.chunk(&words(12));
        assert_eq!(sizes(&chunks), vec![5, 5, 2]);
    }

    #[test]
    fn short_document_is_one_chunk() {
        let chunker = Chunker::new(475, 500, None).expect("chunker");
        let chunks = chunker.chunk("only a few words here");
        assert_eq!(sizes(&chunks), vec![4]);
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = Chunker::new(3, 5, None).expect("chunker");
        assert!(chunker.chunk("   \n\t ").is_empty());
    }

    #[test]
    fn bounds_are_validated_up_front() {
        assert!(matches!(
            Chunker::new(10, 5, None),
            Err(ConfigError::ChunkMinAboveTarget { min: 10, target: 5 })
        ));
        assert!(matches!(
            Chunker::new(1, 10, Some(5)),
            Err(ConfigError::ChunkTargetAboveMax { target: 10, max: 5 })
        ));
    }

    #[test]
    fn explicit_size_outside_bounds_is_rejected() {
        let chunker = Chunker::new(3, 5, Some(8)).expect("chunker");
        assert!(chunker.chunk_with(&words(10), 2).is_err());
        assert!(chunker.chunk_with(&words(10), 9).is_err());
        assert_eq!(sizes(&chunker.chunk_with(&words(10), 5).expect("chunk")), vec![5, 5]);
    }
}
