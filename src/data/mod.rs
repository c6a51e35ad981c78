use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::event::EventFrequency;

/// Name of the default normalization basis: the document's total event count.
pub const EVENT_COUNT_BASIS: &str = "events";

/// Ordered set of distinct feature names surviving a cull.
///
/// Insertion order defines the feature indices used everywhere downstream;
/// indices are stable for the lifetime of one experiment run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVocabulary {
    names: IndexSet<Box<str>>,
}

impl FeatureVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names(names: IndexSet<Box<str>>) -> Self {
        Self { names }
    }

    /// Insert a feature name, returning its index. Re-inserting an existing
    /// name returns the original index; no feature appears twice.
    pub fn push(&mut self, name: &str) -> u32 {
        let (index, _) = self.names.insert_full(name.into());
        index as u32
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.names.get_index_of(name).map(|index| index as u32)
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get_index(index as usize).map(|name| name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|name| name.as_ref())
    }
}

/// One scalar observation: a feature's raw count in a document and the value
/// derived from it via the named normalization basis. Immutable once the
/// document's aggregation is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureData {
    pub index: u32,
    pub basis: Box<str>,
    pub raw_count: u64,
    pub value: f64,
}

/// Sparse per-document feature storage: an association list sorted by
/// feature index, plus the basis table used to derive relative frequencies.
///
/// Features absent from the list are implicitly zero; every consumer treats
/// omission and a stored zero identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentData {
    features: Vec<FeatureData>,
    #[serde(with = "indexmap::map::serde_seq")]
    bases: IndexMap<Box<str>, f64>,
}

impl DocumentData {
    /// Build from pre-computed parts. `features` must be sorted by index.
    pub fn from_parts(mut features: Vec<FeatureData>, bases: IndexMap<Box<str>, f64>) -> Self {
        features.sort_by_key(|feature| feature.index);
        Self { features, bases }
    }

    pub fn feature(&self, index: u32) -> Option<&FeatureData> {
        self.features
            .binary_search_by_key(&index, |feature| feature.index)
            .ok()
            .map(|slot| &self.features[slot])
    }

    /// Derived value for a feature index; zero when not stored.
    pub fn value(&self, index: u32) -> f64 {
        self.feature(index).map_or(0.0, |feature| feature.value)
    }

    pub fn basis(&self, name: &str) -> Option<f64> {
        self.bases.get(name).copied()
    }

    pub fn features(&self) -> &[FeatureData] {
        &self.features
    }

    /// Materialize the dense feature vector for a vocabulary of `len`
    /// features, zeros filled in for absent indices.
    pub fn dense_vector(&self, len: usize) -> Vec<f64> {
        let mut vector = vec![0.0; len];
        for feature in &self.features {
            if let Some(slot) = vector.get_mut(feature.index as usize) {
                *slot = feature.value;
            }
        }
        vector
    }
}

/// One (author, document) record in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub author: Arc<str>,
    pub title: Arc<str>,
    pub data: DocumentData,
}

/// Outcome of inserting a record into a [`DataMap`].
///
/// Re-adding an existing (author, title) key overwrites the stored record
/// entirely; `Replaced` reports the conflict so callers can escalate it.
/// There is no accumulation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
}

/// The sparse author/document feature aggregation store.
///
/// Records live in an arena indexed by (author, title); every stored feature
/// index refers into the map's vocabulary. Built once per experiment phase
/// and treated as immutable once handed to an analyzer, so fold workers can
/// share it read-only.
#[derive(Debug, Clone)]
pub struct DataMap {
    vocabulary: Arc<FeatureVocabulary>,
    records: Vec<DocumentRecord>,
    slots: HashMap<(Arc<str>, Arc<str>), usize>,
}

impl DataMap {
    pub fn new(vocabulary: Arc<FeatureVocabulary>) -> Self {
        Self {
            vocabulary,
            records: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn vocabulary(&self) -> &FeatureVocabulary {
        &self.vocabulary
    }

    pub fn vocabulary_handle(&self) -> Arc<FeatureVocabulary> {
        self.vocabulary.clone()
    }

    pub fn insert(
        &mut self,
        author: &str,
        title: &str,
        data: DocumentData,
    ) -> Result<InsertOutcome, DataError> {
        if let Some(feature) = data
            .features()
            .iter()
            .find(|feature| feature.index as usize >= self.vocabulary.len())
        {
            return Err(DataError::IndexOutOfVocabulary {
                index: feature.index,
                len: self.vocabulary.len(),
            });
        }
        let key = (Arc::<str>::from(author), Arc::<str>::from(title));
        if let Some(&slot) = self.slots.get(&key) {
            self.records[slot].data = data;
            return Ok(InsertOutcome::Replaced);
        }
        let record = DocumentRecord {
            author: key.0.clone(),
            title: key.1.clone(),
            data,
        };
        self.slots.insert(key, self.records.len());
        self.records.push(record);
        Ok(InsertOutcome::Inserted)
    }

    pub fn get(&self, author: &str, title: &str) -> Option<&DocumentData> {
        let key = (Arc::<str>::from(author), Arc::<str>::from(title));
        self.slots.get(&key).map(|&slot| &self.records[slot].data)
    }

    pub fn records(&self) -> &[DocumentRecord] {
        &self.records
    }

    /// Distinct authors in first-insertion order.
    pub fn authors(&self) -> Vec<Arc<str>> {
        let mut seen = IndexSet::new();
        for record in &self.records {
            seen.insert(record.author.clone());
        }
        seen.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Builds a [`DataMap`] from per-document event frequencies, computing raw
/// counts and normalized values against the document's event-count basis.
#[derive(Debug)]
pub struct DataMapBuilder {
    map: DataMap,
}

impl DataMapBuilder {
    pub fn new(vocabulary: Arc<FeatureVocabulary>) -> Self {
        Self {
            map: DataMap::new(vocabulary),
        }
    }

    /// Aggregate one document. Only vocabulary features actually observed are
    /// stored (sparse); a zero normalization denominator marks the document
    /// as degenerate and is surfaced as an error, never coerced.
    pub fn add_document(
        &mut self,
        author: &str,
        title: &str,
        frequency: &EventFrequency,
    ) -> Result<InsertOutcome, DataError> {
        let denominator = frequency.total() as f64;
        if denominator == 0.0 {
            return Err(DataError::ZeroDenominator {
                document: title.to_string(),
                basis: EVENT_COUNT_BASIS.to_string(),
            });
        }
        let mut features = Vec::new();
        for (index, name) in self.map.vocabulary.iter().enumerate() {
            let raw_count = frequency.count(name);
            if raw_count == 0 {
                continue;
            }
            features.push(FeatureData {
                index: index as u32,
                basis: EVENT_COUNT_BASIS.into(),
                raw_count,
                value: raw_count as f64 / denominator,
            });
        }
        let mut bases = IndexMap::new();
        bases.insert(Box::from(EVENT_COUNT_BASIS), denominator);
        self.map.insert(author, title, DocumentData { features, bases })
    }

    pub fn finish(self) -> DataMap {
        self.map
    }
}
