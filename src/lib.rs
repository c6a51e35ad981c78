/// This crate is an Authorship Attribution Engine built on stylometric event analysis.
pub mod analyzer;
pub mod chunk;
pub mod config;
pub mod data;
pub mod error;
pub mod event;
pub mod pipeline;

/// Attribution Pipeline
/// The top-level type of this crate, wiring the stages together:
/// chunking (through the chunk cache), event extraction, frequency-based
/// culling, and sparse data-map aggregation.
///
/// It holds:
/// - The engine configuration
/// - The document chunker
/// - The concurrent chunk cache
/// - The event extractor
///
/// `AttributionPipeline<X>` is generic over the extraction capability `X`,
/// so external taggers plug in behind the same seam as the built-in
/// extractors. All state is explicit; nothing lives in ambient statics.
pub use pipeline::{AttributionPipeline, CorpusBuild, ExcludedDocument, KnownDocument};

/// Engine Configuration
/// The enumerated configuration surface: cache switch, chunking bounds and
/// staleness differential, and the corpus word-count floor. Deserializes
/// from partial documents with serde defaults and validates fast.
pub use config::EngineConfig;

/// Event Culler
/// Frequency-based vocabulary reduction: most-common-N, least-common-N
/// (both tie-inclusive at the selection boundary) and the max-appearances
/// ceiling filter.
pub use event::culler::{CullOutcome, EventCuller};

/// Event Extraction
/// The extraction capability trait plus the built-in word and character
/// n-gram extractors, and the per-document event bookkeeping types.
pub use event::{CharNGramExtractor, EventExtractor, EventFrequency, EventSequence, WordExtractor};

/// Chunk Cache
/// Thread-safe cache of chunked extraction payloads with a size-differential
/// staleness policy, per-key single-flight, bulk invalidation, and CBOR
/// persistence for ops tooling.
pub use chunk::cache::ChunkCache;
pub use chunk::Chunker;

/// Data Map
/// The sparse author → document → feature aggregation store consumed by
/// every analyzer, together with its vocabulary and builder.
pub use data::{DataMap, DataMapBuilder, DocumentData, FeatureData, FeatureVocabulary, InsertOutcome};

/// Analyzer Harness
/// Wraps an external classifier capability; classifies test corpora with
/// known or unknown authors and drives stratified k-fold cross-validation,
/// standard or relaxed, with cooperative cancellation.
pub use analyzer::{AnalyzerHarness, CancelFlag, CentroidClassifier, Classifier, TrainingRow};

/// Experiment Results
/// Per-document verdicts, failure records, accuracy (strict or top-K
/// relaxed), and the author-by-author confusion matrix with its textual
/// rendering. Serializes to the JSON report document.
pub use analyzer::results::{
    ClassificationFailure, ConfusionMatrix, DocResult, ExperimentResults, UNKNOWN_AUTHOR,
};

/// Error taxonomy
/// Configuration errors fail fast; extraction and classifier failures are
/// recorded per document/fold; cache staleness never surfaces as an error.
pub use error::{CacheError, ClassifierError, ConfigError, DataError, ExtractionError, StyloError};
