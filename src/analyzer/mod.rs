pub mod results;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::data::DataMap;
use crate::error::{ClassifierError, ConfigError};
use self::results::{ClassificationFailure, DocResult, ExperimentResults, UNKNOWN_AUTHOR};

/// One labeled training observation: a dense feature vector over the
/// experiment vocabulary and its author label.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow<'a> {
    pub features: Vec<f64>,
    pub author: &'a str,
}

/// External classifier capability.
///
/// `fit` builds a model from labeled rows; `predict` maps a feature vector
/// to a probability per author (summing to 1, or closely so). A model is
/// never mutated concurrently: the harness builds one model per fold.
pub trait Classifier: Sync {
    type Model: Send + Sync;

    fn fit(&self, rows: &[TrainingRow<'_>]) -> Result<Self::Model, ClassifierError>;

    fn predict(
        &self,
        model: &Self::Model,
        features: &[f64],
    ) -> Result<BTreeMap<String, f64>, ClassifierError>;
}

/// Built-in classifier: cosine similarity against per-author centroid
/// vectors, similarities normalized into a probability distribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidClassifier;

#[derive(Debug, Clone)]
pub struct CentroidModel {
    centroids: Vec<(String, Vec<f64>)>,
}

impl Classifier for CentroidClassifier {
    type Model = CentroidModel;

    fn fit(&self, rows: &[TrainingRow<'_>]) -> Result<Self::Model, ClassifierError> {
        if rows.is_empty() {
            return Err(ClassifierError::Fit("no training rows".to_string()));
        }
        let len = rows[0].features.len();
        let mut sums: BTreeMap<&str, (Vec<f64>, usize)> = BTreeMap::new();
        for row in rows {
            if row.features.len() != len {
                return Err(ClassifierError::Fit(format!(
                    "ragged training rows: {} vs {}",
                    row.features.len(),
                    len
                )));
            }
            let (sum, count) = sums.entry(row.author).or_insert_with(|| (vec![0.0; len], 0));
            for (slot, value) in sum.iter_mut().zip(&row.features) {
                *slot += value;
            }
            *count += 1;
        }
        let centroids = sums
            .into_iter()
            .map(|(author, (sum, count))| {
                let centroid = sum.into_iter().map(|value| value / count as f64).collect();
                (author.to_string(), centroid)
            })
            .collect();
        Ok(CentroidModel { centroids })
    }

    fn predict(
        &self,
        model: &Self::Model,
        features: &[f64],
    ) -> Result<BTreeMap<String, f64>, ClassifierError> {
        if model.centroids.is_empty() {
            return Err(ClassifierError::Predict("model has no centroids".to_string()));
        }
        let scores: Vec<f64> = model
            .centroids
            .iter()
            .map(|(_, centroid)| cosine_similarity(features, centroid).max(0.0))
            .collect();
        let total: f64 = scores.iter().sum();
        let uniform = 1.0 / model.centroids.len() as f64;
        Ok(model
            .centroids
            .iter()
            .zip(scores)
            .map(|((author, _), score)| {
                let probability = if total > 0.0 { score / total } else { uniform };
                (author.clone(), probability)
            })
            .collect())
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cooperative cancellation for in-flight cross-validation runs. Cancelling
/// stops new folds from launching; folds already running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum FoldOutcome {
    Skipped,
    Evaluated {
        results: Vec<DocResult>,
        failures: Vec<ClassificationFailure>,
    },
}

/// Drives an external classifier over data maps: direct classification of
/// test corpora and stratified k-fold cross-validation.
#[derive(Debug)]
pub struct AnalyzerHarness<C: Classifier> {
    classifier: C,
}

impl<C: Classifier> AnalyzerHarness<C> {
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Fit on `train`, classify every document of `test`, recording each
    /// document's true author as the actual label.
    pub fn classify_with_known_authors(
        &self,
        train: &DataMap,
        test: &DataMap,
    ) -> Result<ExperimentResults, ClassifierError> {
        self.classify(train, test, false)
    }

    /// Like [`AnalyzerHarness::classify_with_known_authors`], but the actual
    /// author is recorded as the [`UNKNOWN_AUTHOR`] sentinel. For real
    /// deanonymization tasks where ground truth does not exist.
    pub fn classify_with_unknown_authors(
        &self,
        train: &DataMap,
        test: &DataMap,
    ) -> Result<ExperimentResults, ClassifierError> {
        self.classify(train, test, true)
    }

    fn classify(
        &self,
        train: &DataMap,
        test: &DataMap,
        unknown: bool,
    ) -> Result<ExperimentResults, ClassifierError> {
        let slots: Vec<usize> = (0..train.len()).collect();
        let rows = rows_for(train, &slots);
        let model = self.classifier.fit(&rows)?;

        let len = train.vocabulary().len();
        let mut out = ExperimentResults::new();
        for record in test.records() {
            let actual = if unknown {
                UNKNOWN_AUTHOR.to_string()
            } else {
                record.author.to_string()
            };
            match self.classifier.predict(&model, &record.data.dense_vector(len)) {
                Ok(probabilities) => out.push(DocResult {
                    title: record.title.to_string(),
                    actual,
                    probabilities,
                }),
                Err(err) => {
                    warn!(title = record.title.as_ref(), %err, "prediction failed");
                    out.push_failure(ClassificationFailure {
                        title: record.title.to_string(),
                        author: actual,
                        reason: err.to_string(),
                    });
                }
            }
        }
        out.finalize();
        Ok(out)
    }

    /// Stratified k-fold cross-validation, deterministic for a given seed.
    pub fn run_cross_validation(
        &self,
        data: &DataMap,
        folds: usize,
        seed: u64,
    ) -> Result<ExperimentResults, ConfigError> {
        self.cross_validate(data, folds, seed, 1, &CancelFlag::new())
    }

    /// Cross-validation with relaxed top-K accuracy: a prediction counts as
    /// correct when the true author is among the `relax_factor` most
    /// probable authors. A factor of 1 is identical to the standard run.
    pub fn run_relaxed_cross_validation(
        &self,
        data: &DataMap,
        folds: usize,
        seed: u64,
        relax_factor: usize,
    ) -> Result<ExperimentResults, ConfigError> {
        self.cross_validate(data, folds, seed, relax_factor, &CancelFlag::new())
    }

    /// The full cross-validation entry point, with cancellation.
    ///
    /// Folds are evaluated in parallel, each against its own model. A fit
    /// failure marks every held-out document of that fold failed; a predict
    /// failure marks that document failed; sibling folds are unaffected and
    /// their results remain usable, with the aggregate flagged incomplete.
    pub fn cross_validate(
        &self,
        data: &DataMap,
        folds: usize,
        seed: u64,
        relax_factor: usize,
        cancel: &CancelFlag,
    ) -> Result<ExperimentResults, ConfigError> {
        if folds == 0 {
            return Err(ConfigError::ZeroFolds);
        }
        if relax_factor == 0 {
            return Err(ConfigError::ZeroRelaxFactor);
        }
        if folds > data.len() {
            return Err(ConfigError::TooManyFolds {
                folds,
                documents: data.len(),
            });
        }

        let fold_slots = stratified_folds(data, folds, seed);
        debug!(folds, seed, documents = data.len(), "running cross-validation");

        let outcomes: Vec<FoldOutcome> = fold_slots
            .par_iter()
            .map(|held_out| {
                if cancel.is_cancelled() {
                    return FoldOutcome::Skipped;
                }
                self.evaluate_fold(data, held_out)
            })
            .collect();

        let mut out = ExperimentResults::new();
        out.set_relax_factor(relax_factor);
        for outcome in outcomes {
            match outcome {
                FoldOutcome::Skipped => out.mark_incomplete(),
                FoldOutcome::Evaluated { results, failures } => {
                    for result in results {
                        out.push(result);
                    }
                    for failure in failures {
                        out.push_failure(failure);
                    }
                }
            }
        }
        out.finalize();
        Ok(out)
    }

    fn evaluate_fold(&self, data: &DataMap, held_out: &[usize]) -> FoldOutcome {
        let held: HashSet<usize> = held_out.iter().copied().collect();
        let train_slots: Vec<usize> = (0..data.len()).filter(|slot| !held.contains(slot)).collect();
        let rows = rows_for(data, &train_slots);

        let len = data.vocabulary().len();
        let mut results = Vec::new();
        let mut failures = Vec::new();
        match self.classifier.fit(&rows) {
            Err(err) => {
                warn!(%err, "fold fit failed, marking its documents failed");
                for &slot in held_out {
                    let record = &data.records()[slot];
                    failures.push(ClassificationFailure {
                        title: record.title.to_string(),
                        author: record.author.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
            Ok(model) => {
                for &slot in held_out {
                    let record = &data.records()[slot];
                    match self.classifier.predict(&model, &record.data.dense_vector(len)) {
                        Ok(probabilities) => results.push(DocResult {
                            title: record.title.to_string(),
                            actual: record.author.to_string(),
                            probabilities,
                        }),
                        Err(err) => failures.push(ClassificationFailure {
                            title: record.title.to_string(),
                            author: record.author.to_string(),
                            reason: err.to_string(),
                        }),
                    }
                }
            }
        }
        FoldOutcome::Evaluated { results, failures }
    }
}

fn rows_for<'a>(data: &'a DataMap, slots: &[usize]) -> Vec<TrainingRow<'a>> {
    let len = data.vocabulary().len();
    slots
        .iter()
        .map(|&slot| {
            let record = &data.records()[slot];
            TrainingRow {
                features: record.data.dense_vector(len),
                author: &record.author,
            }
        })
        .collect()
}

/// Stratified fold assignment: per author, documents are shuffled with the
/// seeded generator and dealt round-robin, so each fold's held-out count for
/// an author stays within one of D/K. The round-robin cursor carries across
/// authors to keep overall fold sizes balanced as well.
fn stratified_folds(data: &DataMap, folds: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut by_author: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (slot, record) in data.records().iter().enumerate() {
        by_author.entry(&record.author).or_default().push(slot);
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut assignment = vec![Vec::new(); folds];
    let mut cursor = 0usize;
    for (_, mut slots) in by_author {
        slots.sort_by(|&a, &b| data.records()[a].title.cmp(&data.records()[b].title));
        slots.shuffle(&mut rng);
        for slot in slots {
            assignment[cursor % folds].push(slot);
            cursor += 1;
        }
    }
    assignment
}
