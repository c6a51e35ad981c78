use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::chunk::cache::ChunkCache;
use crate::chunk::Chunker;
use crate::config::EngineConfig;
use crate::data::{DataMap, DataMapBuilder, FeatureVocabulary};
use crate::error::{ConfigError, StyloError};
use crate::event::culler::EventCuller;
use crate::event::{EventExtractor, EventFrequency, EventSequence};

/// A raw input document with its (known or claimed) author.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownDocument {
    pub author: String,
    pub title: String,
    pub text: String,
}

impl KnownDocument {
    pub fn new(author: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            title: title.into(),
            text: text.into(),
        }
    }
}

/// A document left out of a build, with the reason why.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedDocument {
    pub title: String,
    pub reason: String,
}

/// Outcome of building a corpus: the data map plus every exclusion.
#[derive(Debug)]
pub struct CorpusBuild {
    pub data_map: DataMap,
    pub excluded: Vec<ExcludedDocument>,
}

/// Ties the stages together: chunking (through the cache), extraction,
/// culling, and data-map aggregation. All state is explicit; there are no
/// ambient statics. The pipeline is `Sync`, so builds can run from any
/// thread, and per-document extraction is parallel internally.
pub struct AttributionPipeline<X: EventExtractor> {
    config: EngineConfig,
    chunker: Chunker,
    cache: ChunkCache,
    extractor: X,
    feature_set_id: String,
}

impl<X: EventExtractor> AttributionPipeline<X> {
    /// `feature_set_id` names the extractor configuration in cache keys, so
    /// payloads extracted for one feature set are never served to another.
    pub fn new(
        config: EngineConfig,
        extractor: X,
        feature_set_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let chunker = Chunker::from_config(&config)?;
        let cache = ChunkCache::from_config(&config);
        Ok(Self {
            config,
            chunker,
            cache,
            extractor,
            feature_set_id: feature_set_id.into(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Build the training data map: enforce the corpus size floor, chunk and
    /// extract every document, cull the event pool, aggregate.
    ///
    /// Per-document extraction failures and degenerate documents do not
    /// abort the run; they are excluded and reported in the build.
    pub fn build_training_map(
        &self,
        documents: &[KnownDocument],
        culler: &EventCuller,
    ) -> Result<CorpusBuild, StyloError> {
        self.check_corpus_size(documents)?;
        let (sequences, mut excluded) = self.extract_sequences(documents);
        let outcome = culler.cull(&sequences)?;
        let data_map = aggregate(Arc::new(outcome.vocabulary), &outcome.sequences, &mut excluded);
        Ok(CorpusBuild { data_map, excluded })
    }

    /// Build a test data map against an existing vocabulary. No culling and
    /// no corpus size floor: test corpora may be single short documents.
    pub fn build_test_map(
        &self,
        documents: &[KnownDocument],
        vocabulary: Arc<FeatureVocabulary>,
    ) -> Result<CorpusBuild, StyloError> {
        let (sequences, mut excluded) = self.extract_sequences(documents);
        let data_map = aggregate(vocabulary, &sequences, &mut excluded);
        Ok(CorpusBuild { data_map, excluded })
    }

    fn check_corpus_size(&self, documents: &[KnownDocument]) -> Result<(), ConfigError> {
        let words: usize = documents
            .iter()
            .map(|document| document.text.split_whitespace().count())
            .sum();
        if words < self.config.min_corpus_word_count {
            return Err(ConfigError::CorpusTooSmall {
                words,
                required: self.config.min_corpus_word_count,
            });
        }
        Ok(())
    }

    fn extract_sequences(
        &self,
        documents: &[KnownDocument],
    ) -> (Vec<EventSequence>, Vec<ExcludedDocument>) {
        let per_document: Vec<Result<Vec<EventSequence>, ExcludedDocument>> = documents
            .par_iter()
            .map(|document| self.extract_document(document))
            .collect();

        let mut sequences = Vec::new();
        let mut excluded = Vec::new();
        for outcome in per_document {
            match outcome {
                Ok(mut extracted) => sequences.append(&mut extracted),
                Err(exclusion) => {
                    warn!(
                        title = exclusion.title.as_str(),
                        reason = exclusion.reason.as_str(),
                        "document excluded from build"
                    );
                    excluded.push(exclusion);
                }
            }
        }
        (sequences, excluded)
    }

    fn extract_document(
        &self,
        document: &KnownDocument,
    ) -> Result<Vec<EventSequence>, ExcludedDocument> {
        let exclude = |reason: String| ExcludedDocument {
            title: document.title.clone(),
            reason,
        };
        let author: Arc<str> = document.author.as_str().into();

        if !self.config.chunk_documents {
            let events = self
                .extractor
                .extract(&document.text)
                .map_err(|err| exclude(err.to_string()))?;
            return Ok(vec![EventSequence::new(author, document.title.as_str(), events)]);
        }

        // Cache identity must span the engine's whole (author, title) key
        // space: same-titled documents from different authors are distinct.
        let cache_id = format!("{}::{}", document.author, document.title);
        let entry = self
            .cache
            .get_chunks(
                &cache_id,
                &self.feature_set_id,
                self.chunker.target_size(),
                || {
                    let pieces = self.chunker.chunk(&document.text);
                    debug!(title = document.title.as_str(), chunks = pieces.len(), "chunking document");
                    pieces
                        .iter()
                        .map(|piece| self.extractor.extract(piece))
                        .collect()
                },
            )
            .map_err(|err| exclude(err.to_string()))?;

        if entry.chunks.is_empty() {
            return Err(exclude("document produced no chunks".to_string()));
        }

        Ok(entry
            .chunks
            .iter()
            .enumerate()
            .map(|(i, events)| {
                EventSequence::new(
                    author.clone(),
                    format!("{}[{}]", document.title, i),
                    events.clone(),
                )
            })
            .collect())
    }
}

fn aggregate(
    vocabulary: Arc<FeatureVocabulary>,
    sequences: &[EventSequence],
    excluded: &mut Vec<ExcludedDocument>,
) -> DataMap {
    let mut builder = DataMapBuilder::new(vocabulary);
    for sequence in sequences {
        let mut frequency = EventFrequency::new();
        frequency.add_events(&sequence.events);
        if let Err(err) = builder.add_document(&sequence.author, &sequence.title, &frequency) {
            // degenerate document (zero denominator): surfaced, not masked
            warn!(title = sequence.title.as_ref(), %err, "document excluded from data map");
            excluded.push(ExcludedDocument {
                title: sequence.title.to_string(),
                reason: err.to_string(),
            });
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalyzerHarness, CentroidClassifier};
    use crate::error::ExtractionError;
    use crate::event::WordExtractor;

    fn small_config() -> EngineConfig {
        EngineConfig {
            chunk_min_size: 4,
            chunk_default_size: 8,
            min_corpus_word_count: 10,
            ..EngineConfig::default()
        }
    }

    fn corpus() -> Vec<KnownDocument> {
        let alice = "the cat sat on the mat and the dog sat on the log while the cat slept";
        let bob = "storms break upon granite cliffs where gulls wheel above grey water crying into wind";
        vec![
            KnownDocument::new("alice", "alice-letters", alice),
            KnownDocument::new("alice", "alice-diary", alice),
            KnownDocument::new("bob", "bob-essays", bob),
            KnownDocument::new("bob", "bob-notes", bob),
        ]
    }

    fn culler() -> EventCuller {
        EventCuller::MostCommon { target: 40 }
    }

    #[test]
    fn end_to_end_build_and_classify() {
        let pipeline =
            AttributionPipeline::new(small_config(), WordExtractor, "words").expect("pipeline");
        let build = pipeline.build_training_map(&corpus(), &culler()).expect("build");
        assert!(build.excluded.is_empty());
        assert!(build.data_map.len() >= 4);

        let harness = AnalyzerHarness::new(CentroidClassifier);
        let results = harness
            .classify_with_known_authors(&build.data_map, &build.data_map)
            .expect("classify");
        assert!(results.is_complete());
        assert_eq!(results.accuracy(), 1.0);
    }

    #[test]
    fn cached_and_fresh_extraction_classify_identically() {
        let documents = corpus();
        let run = |config: EngineConfig| {
            let pipeline =
                AttributionPipeline::new(config, WordExtractor, "words").expect("pipeline");
            // two builds: the second one is served from the cache when enabled
            pipeline.build_training_map(&documents, &culler()).expect("build");
            let build = pipeline.build_training_map(&documents, &culler()).expect("build");
            let harness = AnalyzerHarness::new(CentroidClassifier);
            harness
                .classify_with_known_authors(&build.data_map, &build.data_map)
                .expect("classify")
        };

        let cached = run(small_config());
        let fresh = run(EngineConfig {
            cache_enabled: false,
            ..small_config()
        });
        // byte-identical per-document probability mappings
        assert_eq!(cached, fresh);
    }

    #[test]
    fn second_build_hits_the_cache() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingExtractor(AtomicUsize);

        impl EventExtractor for CountingExtractor {
            fn extract(&self, text: &str) -> Result<Vec<Box<str>>, ExtractionError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                WordExtractor.extract(text)
            }
        }

        let pipeline = AttributionPipeline::new(
            small_config(),
            CountingExtractor(AtomicUsize::new(0)),
            "words",
        )
        .expect("pipeline");
        let documents = corpus();
        pipeline.build_training_map(&documents, &culler()).expect("build");
        let after_first = pipeline.extractor.0.load(Ordering::SeqCst);
        pipeline.build_training_map(&documents, &culler()).expect("build");
        assert_eq!(pipeline.extractor.0.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn same_title_different_authors_never_share_cached_text() {
        let alice = "the cat sat on the mat and the dog sat on the log while the cat slept";
        let bob = "storms break upon granite cliffs where gulls wheel above grey water crying into wind";
        let documents = vec![
            KnownDocument::new("alice", "letters", alice),
            KnownDocument::new("bob", "letters", bob),
        ];

        let pipeline =
            AttributionPipeline::new(small_config(), WordExtractor, "words").expect("pipeline");
        let build = pipeline.build_training_map(&documents, &culler()).expect("build");
        assert!(build.excluded.is_empty());

        let len = build.data_map.vocabulary().len();
        let alice_data = build.data_map.get("alice", "letters[0]").expect("alice record");
        let bob_data = build.data_map.get("bob", "letters[0]").expect("bob record");
        // disjoint texts: the records must come from different extractions
        assert_ne!(alice_data.dense_vector(len), bob_data.dense_vector(len));
    }

    #[test]
    fn empty_documents_are_reported_not_dropped() {
        let mut documents = corpus();
        documents.push(KnownDocument::new("alice", "blank", "   \n\t "));

        let pipeline =
            AttributionPipeline::new(small_config(), WordExtractor, "words").expect("pipeline");
        let build = pipeline.build_training_map(&documents, &culler()).expect("build");

        let exclusion = build
            .excluded
            .iter()
            .find(|e| e.title == "blank")
            .expect("blank document reported");
        assert!(exclusion.reason.contains("no chunks"));
        assert!(!build.data_map.records().iter().any(|r| r.title.starts_with("blank")));
    }

    #[test]
    fn failing_documents_are_excluded_and_reported() {
        struct PickyExtractor;

        impl EventExtractor for PickyExtractor {
            fn extract(&self, text: &str) -> Result<Vec<Box<str>>, ExtractionError> {
                if text.contains("granite") {
                    return Err(ExtractionError::new("tagger unavailable"));
                }
                WordExtractor.extract(text)
            }
        }

        let pipeline =
            AttributionPipeline::new(small_config(), PickyExtractor, "words").expect("pipeline");
        let build = pipeline.build_training_map(&corpus(), &culler()).expect("build");
        assert_eq!(build.excluded.len(), 2);
        assert!(build.excluded.iter().all(|e| e.title.starts_with("bob-")));
        assert!(build.excluded[0].reason.contains("tagger unavailable"));
        // alice's documents still made it in
        assert!(build.data_map.len() >= 2);
    }

    #[test]
    fn undersized_corpus_fails_before_extraction() {
        let pipeline =
            AttributionPipeline::new(EngineConfig::default(), WordExtractor, "words")
                .expect("pipeline");
        let err = pipeline
            .build_training_map(&corpus(), &culler())
            .expect_err("should fail");
        assert!(matches!(
            err,
            StyloError::Config(ConfigError::CorpusTooSmall { required: 3500, .. })
        ));
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn test_map_reuses_training_vocabulary() {
        let pipeline =
            AttributionPipeline::new(small_config(), WordExtractor, "words").expect("pipeline");
        let build = pipeline.build_training_map(&corpus(), &culler()).expect("build");
        let vocabulary = build.data_map.vocabulary_handle();

        let unseen = vec![KnownDocument::new(
            "unknown",
            "mystery",
            "the cat sat on the mat",
        )];
        let test_build = pipeline.build_test_map(&unseen, vocabulary.clone()).expect("build");
        assert!(test_build.excluded.is_empty());
        assert_eq!(test_build.data_map.vocabulary(), vocabulary.as_ref());

        let harness = AnalyzerHarness::new(CentroidClassifier);
        let results = harness
            .classify_with_unknown_authors(&build.data_map, &test_build.data_map)
            .expect("classify");
        assert_eq!(results.len(), 1);
        assert_eq!(results.results()[0].predicted(), Some("alice"));
    }
}
