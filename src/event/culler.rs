use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use super::EventSequence;
use crate::data::FeatureVocabulary;
use crate::error::ConfigError;

/// Fallback selection target used when a textual culler parameter does not
/// parse as a number.
pub const DEFAULT_CULL_TARGET: usize = 50;

/// Frequency-based event selection.
///
/// Most/least-common selection is tie-inclusive at the boundary: when the
/// event in the last retained position ties in global frequency with events
/// past it, all tied events are retained. Selection is therefore a frequency
/// threshold, not an ordinal cut, and deterministic for any input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCuller {
    /// Keep the `target` globally most frequent events (plus boundary ties).
    MostCommon { target: usize },
    /// Keep the `target` globally least frequent events (plus boundary ties).
    LeastCommon { target: usize },
    /// Keep events whose global frequency is at most `ceiling`.
    MaxAppearances { ceiling: u64 },
}

/// Result of a cull: the surviving vocabulary and the reduced sequences.
///
/// Vocabulary insertion order defines the feature indices used by every
/// downstream consumer.
#[derive(Debug, Clone)]
pub struct CullOutcome {
    pub vocabulary: FeatureVocabulary,
    pub sequences: Vec<EventSequence>,
}

impl EventCuller {
    /// Parse a textual selection parameter. Non-numeric input falls back to
    /// [`DEFAULT_CULL_TARGET`] rather than failing the run.
    pub fn parse_target(raw: &str) -> usize {
        match raw.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                warn!(
                    parameter = raw,
                    fallback = DEFAULT_CULL_TARGET,
                    "non-numeric culler parameter, using default target"
                );
                DEFAULT_CULL_TARGET
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = match self {
            EventCuller::MostCommon { target } | EventCuller::LeastCommon { target } => *target > 0,
            EventCuller::MaxAppearances { ceiling } => *ceiling > 0,
        };
        if positive {
            Ok(())
        } else {
            Err(ConfigError::NonPositiveCullTarget)
        }
    }

    /// Cull a corpus of event sequences down to the selected vocabulary.
    ///
    /// A culled event is removed from every sequence it occurs in; each
    /// sequence keeps its author/document association and the relative order
    /// of its surviving events. An empty corpus yields an empty outcome.
    pub fn cull(&self, sequences: &[EventSequence]) -> Result<CullOutcome, ConfigError> {
        self.validate()?;

        // Global frequencies, keyed in first-observed corpus order.
        let mut frequencies: IndexMap<Box<str>, u64> = IndexMap::new();
        for sequence in sequences {
            for event in &sequence.events {
                *frequencies.entry(event.clone()).or_insert(0) += 1;
            }
        }

        let retained = self.select(&frequencies);

        let sequences = sequences
            .iter()
            .map(|sequence| EventSequence {
                author: sequence.author.clone(),
                title: sequence.title.clone(),
                events: sequence
                    .events
                    .iter()
                    .filter(|event| retained.contains(event.as_ref()))
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(CullOutcome {
            vocabulary: FeatureVocabulary::from_names(retained),
            sequences,
        })
    }

    fn select(&self, frequencies: &IndexMap<Box<str>, u64>) -> IndexSet<Box<str>> {
        match self {
            EventCuller::MaxAppearances { ceiling } => frequencies
                .iter()
                .filter(|(_, &count)| count <= *ceiling)
                .map(|(event, _)| event.clone())
                .collect(),
            EventCuller::MostCommon { target } | EventCuller::LeastCommon { target } => {
                if *target >= frequencies.len() {
                    // Oversized target: the cull is a no-op.
                    return frequencies.keys().cloned().collect();
                }
                let mut ranked: Vec<(&Box<str>, u64)> =
                    frequencies.iter().map(|(event, &count)| (event, count)).collect();
                // Event name as secondary key keeps the ranking deterministic.
                match self {
                    EventCuller::MostCommon { .. } => {
                        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
                    }
                    _ => ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0))),
                }
                let boundary = ranked[*target - 1].1;
                let mut cut = *target;
                while cut < ranked.len() && ranked[cut].1 == boundary {
                    cut += 1;
                }
                ranked[..cut].iter().map(|(event, _)| (*event).clone()).collect()
            }
        }
    }
}
