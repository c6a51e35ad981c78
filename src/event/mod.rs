pub mod culler;

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// An ordered multiset of stylistic events extracted from one document (or
/// one chunk of a document), tagged with its author/document association.
///
/// Owned by the extraction stage; the culler reads it and produces reduced
/// copies, preserving the association and the relative event order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSequence {
    pub author: Arc<str>,
    pub title: Arc<str>,
    pub events: Vec<Box<str>>,
}

impl EventSequence {
    pub fn new(author: impl Into<Arc<str>>, title: impl Into<Arc<str>>, events: Vec<Box<str>>) -> Self {
        Self {
            author: author.into(),
            title: title.into(),
            events,
        }
    }

    /// Count map of this sequence's events.
    pub fn frequency(&self) -> EventFrequency {
        let mut freq = EventFrequency::new();
        freq.add_events(&self.events);
        freq
    }
}

/// Occurrence counts of events within one document.
///
/// Keeps insertion order so that derived vocabularies and serialized forms
/// are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFrequency {
    #[serde(with = "indexmap::map::serde_seq")]
    counts: IndexMap<Box<str>, u64>,
    total: u64,
}

impl EventFrequency {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_event(&mut self, event: &str) -> &mut Self {
        *self.counts.entry(event.into()).or_insert(0) += 1;
        self.total += 1;
        self
    }

    #[inline]
    pub fn add_events<T>(&mut self, events: &[T]) -> &mut Self
    where
        T: AsRef<str>,
    {
        for event in events {
            self.add_event(event.as_ref());
        }
        self
    }

    /// Occurrences of one event; zero when never seen.
    pub fn count(&self, event: &str) -> u64 {
        self.counts.get(event).copied().unwrap_or(0)
    }

    /// Total number of events observed, duplicates included.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct events.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(event, &count)| (event.as_ref(), count))
    }
}

/// External extraction capability: turns raw text into an event sequence.
///
/// Assumed stateless per call. The chunk cache exists to amortize the cost
/// of expensive implementations (external taggers and the like).
pub trait EventExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Result<Vec<Box<str>>, ExtractionError>;
}

/// Whitespace-delimited word events.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordExtractor;

impl EventExtractor for WordExtractor {
    fn extract(&self, text: &str) -> Result<Vec<Box<str>>, ExtractionError> {
        Ok(text.split_whitespace().map(Box::from).collect())
    }
}

/// Character n-gram events over the raw text, whitespace runs collapsed to a
/// single space so formatting does not leak into the feature pool.
#[derive(Debug, Clone, Copy)]
pub struct CharNGramExtractor {
    pub n: usize,
}

impl CharNGramExtractor {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl EventExtractor for CharNGramExtractor {
    fn extract(&self, text: &str) -> Result<Vec<Box<str>>, ExtractionError> {
        if self.n == 0 {
            return Err(ExtractionError::new("n-gram size must be positive"));
        }
        let mut normalized = String::with_capacity(text.len());
        let mut last_was_space = false;
        for c in text.chars() {
            if c.is_whitespace() {
                if !last_was_space {
                    normalized.push(' ');
                }
                last_was_space = true;
            } else {
                normalized.push(c);
                last_was_space = false;
            }
        }
        let chars: Vec<char> = normalized.trim().chars().collect();
        if chars.len() < self.n {
            return Ok(Vec::new());
        }
        Ok(chars
            .windows(self.n)
            .map(|window| window.iter().collect::<String>().into_boxed_str())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_counts_and_total() {
        let mut freq = EventFrequency::new();
        freq.add_event("the").add_event("of").add_event("the");
        assert_eq!(freq.count("the"), 2);
        assert_eq!(freq.count("of"), 1);
        assert_eq!(freq.count("and"), 0);
        assert_eq!(freq.total(), 3);
        assert_eq!(freq.distinct(), 2);
    }

    #[test]
    fn word_extractor_splits_on_whitespace() {
        let events = WordExtractor.extract("the  quick\nfox").expect("extract");
        assert_eq!(events, vec![Box::from("the"), Box::from("quick"), Box::from("fox")]);
    }

    #[test]
    fn char_ngrams_collapse_whitespace() {
        let events = CharNGramExtractor::new(2).extract("ab  cd").expect("extract");
        let rendered: Vec<&str> = events.iter().map(|e| e.as_ref()).collect();
        assert_eq!(rendered, vec!["ab", "b ", " c", "cd"]);
    }

    #[test]
    fn char_ngrams_reject_zero_n() {
        assert!(CharNGramExtractor::new(0).extract("abc").is_err());
    }

    #[test]
    fn char_ngrams_short_text_yields_nothing() {
        let events = CharNGramExtractor::new(5).extract("abc").expect("extract");
        assert!(events.is_empty());
    }
}
