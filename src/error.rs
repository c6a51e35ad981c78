use thiserror::Error;

/// Configuration problems. These are raised before any extraction or
/// training work begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("culler selection target must be positive")]
    NonPositiveCullTarget,
    #[error("chunk min size {min} exceeds target size {target}")]
    ChunkMinAboveTarget { min: usize, target: usize },
    #[error("chunk target size {target} exceeds max size {max}")]
    ChunkTargetAboveMax { target: usize, max: usize },
    #[error("chunk size {size} is outside the configured bounds [{min}, {max}]")]
    ChunkSizeOutOfBounds { size: usize, min: usize, max: usize },
    #[error("chunk size differential must be finite and non-negative, got {0}")]
    BadDifferential(f64),
    #[error("cross-validation requires at least one fold")]
    ZeroFolds,
    #[error("{folds} folds exceed the {documents} available documents")]
    TooManyFolds { folds: usize, documents: usize },
    #[error("relax factor must be positive")]
    ZeroRelaxFactor,
    #[error("corpus has {words} words, below the required minimum of {required}")]
    CorpusTooSmall { words: usize, required: usize },
}

/// A per-document extraction failure. The document is excluded from the
/// build and the exclusion is reported; the run continues.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct ExtractionError {
    pub reason: String,
}

impl ExtractionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failures from the external classifier capability. Recorded per
/// fold/document, never silently swallowed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("model fit failed: {0}")]
    Fit(String),
    #[error("prediction failed: {0}")]
    Predict(String),
}

/// Aggregation-stage failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    /// The document's normalization denominator is zero. This signals a
    /// degenerate document and is surfaced, never coerced to zero.
    #[error("document {document:?} has a zero denominator for basis {basis:?}")]
    ZeroDenominator { document: String, basis: String },
    #[error("feature index {index} is outside the vocabulary of length {len}")]
    IndexOutOfVocabulary { index: u32, len: usize },
}

/// Chunk-cache persistence failures. Cache staleness is not an error and
/// never surfaces here; it only triggers recomputation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encoding: {0}")]
    Encode(#[from] serde_cbor::Error),
}

/// Umbrella error for the whole engine.
#[derive(Debug, Error)]
pub enum StyloError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}
