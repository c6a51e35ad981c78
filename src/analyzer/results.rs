use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel recorded as the actual author when ground truth does not exist.
pub const UNKNOWN_AUTHOR: &str = "<unknown>";

/// The classification of one document: its true (or sentinel) author and
/// the predicted probability per candidate author. Immutable once produced.
///
/// Probabilities live in a `BTreeMap`, so iteration is lexicographic by
/// author name and every tie-break over equal probabilities is stable by
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocResult {
    pub title: String,
    pub actual: String,
    pub probabilities: BTreeMap<String, f64>,
}

impl DocResult {
    /// Argmax over the probability map; ties go to the lexicographically
    /// smaller author. `None` when the map is empty.
    pub fn predicted(&self) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for (author, &probability) in &self.probabilities {
            if best.map_or(true, |(_, top)| probability > top) {
                best = Some((author, probability));
            }
        }
        best.map(|(author, _)| author)
    }

    /// The `k` highest-probability authors, most probable first; equal
    /// probabilities keep lexicographic order.
    pub fn top_authors(&self, k: usize) -> Vec<&str> {
        let mut ranked: Vec<(&str, f64)> = self
            .probabilities
            .iter()
            .map(|(author, &probability)| (author.as_str(), probability))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().take(k).map(|(author, _)| author).collect()
    }

    /// Whether this result counts as correct under a relax factor: the
    /// actual author appears among the top `relax_factor` predictions.
    /// A factor of 1 is exactly argmax correctness.
    pub fn is_correct(&self, relax_factor: usize) -> bool {
        if relax_factor <= 1 {
            self.predicted() == Some(self.actual.as_str())
        } else {
            self.top_authors(relax_factor).contains(&self.actual.as_str())
        }
    }
}

/// A document the classifier could not produce a result for, with the
/// reason. Counted separately from misclassified documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationFailure {
    pub title: String,
    pub author: String,
    pub reason: String,
}

/// Aggregate of one experiment: per-document results plus failure records.
///
/// Results are sorted by document title when finalized, so the output is
/// identical no matter how folds were scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    results: Vec<DocResult>,
    failures: Vec<ClassificationFailure>,
    relax_factor: usize,
    complete: bool,
}

impl Default for ExperimentResults {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentResults {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            failures: Vec::new(),
            relax_factor: 1,
            complete: true,
        }
    }

    pub(crate) fn push(&mut self, result: DocResult) {
        self.results.push(result);
    }

    pub(crate) fn push_failure(&mut self, failure: ClassificationFailure) {
        self.failures.push(failure);
    }

    pub(crate) fn set_relax_factor(&mut self, relax_factor: usize) {
        self.relax_factor = relax_factor;
    }

    pub(crate) fn mark_incomplete(&mut self) {
        self.complete = false;
    }

    pub(crate) fn finalize(&mut self) {
        self.results.sort_by(|a, b| a.title.cmp(&b.title));
        self.failures.sort_by(|a, b| a.title.cmp(&b.title));
        if !self.failures.is_empty() {
            self.complete = false;
        }
    }

    pub fn results(&self) -> &[DocResult] {
        &self.results
    }

    pub fn failures(&self) -> &[ClassificationFailure] {
        &self.failures
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// False when any fold or document failed, or the run was cancelled.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn relax_factor(&self) -> usize {
        self.relax_factor
    }

    /// Fraction of classified documents counted correct under this result
    /// set's relax factor. Failed documents are not in the denominator;
    /// they are reported via [`ExperimentResults::failed_count`].
    pub fn accuracy(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let correct = self
            .results
            .iter()
            .filter(|result| result.is_correct(self.relax_factor))
            .count();
        correct as f64 / self.results.len() as f64
    }

    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        ConfusionMatrix::from_results(&self.results)
    }

    /// The JSON report document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Author-by-author confusion counts.
///
/// Rows are actual authors, columns are predicted authors; this orientation
/// is fixed across the crate. Labels are the lexicographically sorted
/// distinct authors observed in the results (actual labels and probability
/// keys alike). The strict argmax prediction is counted regardless of any
/// relax factor, and each classified document contributes exactly one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    authors: Vec<String>,
    cells: Vec<u64>,
}

impl ConfusionMatrix {
    pub(crate) fn from_results(results: &[DocResult]) -> Self {
        let mut observed: BTreeSet<&str> = BTreeSet::new();
        for result in results {
            observed.insert(&result.actual);
            for author in result.probabilities.keys() {
                observed.insert(author);
            }
        }
        let authors: Vec<String> = observed.into_iter().map(String::from).collect();
        let n = authors.len();
        let mut cells = vec![0u64; n * n];
        for result in results {
            let Some(predicted) = result.predicted() else {
                continue;
            };
            let row = authors.binary_search_by(|a| a.as_str().cmp(&result.actual));
            let col = authors.binary_search_by(|a| a.as_str().cmp(predicted));
            if let (Ok(row), Ok(col)) = (row, col) {
                cells[row * n + col] += 1;
            }
        }
        Self { authors, cells }
    }

    /// Sorted, deduplicated author labels shared by rows and columns.
    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn cell(&self, row: usize, col: usize) -> u64 {
        self.cells[row * self.authors.len() + col]
    }

    /// Count for (actual, predicted); zero when either label is unknown.
    pub fn count(&self, actual: &str, predicted: &str) -> u64 {
        let row = self.authors.binary_search_by(|a| a.as_str().cmp(actual));
        let col = self.authors.binary_search_by(|a| a.as_str().cmp(predicted));
        match (row, col) {
            (Ok(row), Ok(col)) => self.cell(row, col),
            _ => 0,
        }
    }

    /// Sum of every cell: the number of classified documents.
    pub fn total(&self) -> u64 {
        self.cells.iter().sum()
    }

    /// Sum of the diagonal: correctly attributed documents.
    pub fn trace(&self) -> u64 {
        let n = self.authors.len();
        (0..n).map(|i| self.cells[i * n + i]).sum()
    }

    /// trace / total; zero for an empty matrix.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.trace() as f64 / total as f64
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    /// Textual rendering with authors as both row and column headers;
    /// rows are actual, columns are predicted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .authors
            .iter()
            .map(|author| author.len())
            .max()
            .unwrap_or(0)
            .max(6)
            + 2;
        write!(f, "{:>width$}", "")?;
        for author in &self.authors {
            write!(f, "{author:>width$}")?;
        }
        writeln!(f)?;
        for (row, author) in self.authors.iter().enumerate() {
            write!(f, "{author:>width$}")?;
            for col in 0..self.authors.len() {
                write!(f, "{:>width$}", self.cell(row, col))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, actual: &str, probabilities: &[(&str, f64)]) -> DocResult {
        DocResult {
            title: title.to_string(),
            actual: actual.to_string(),
            probabilities: probabilities
                .iter()
                .map(|(author, p)| (author.to_string(), *p))
                .collect(),
        }
    }

    #[test]
    fn argmax_ties_break_lexicographically() {
        let r = result("letters", "b", &[("b", 0.5), ("a", 0.5)]);
        assert_eq!(r.predicted(), Some("a"));
        assert!(!r.is_correct(1));
        assert!(r.is_correct(2));
    }

    #[test]
    fn top_authors_rank_by_probability() {
        let r = result("letters", "b", &[("a", 0.2), ("b", 0.5), ("c", 0.3)]);
        assert_eq!(r.top_authors(2), vec!["b", "c"]);
    }

    #[test]
    fn matrix_counts_and_labels() {
        let mut results = ExperimentResults::new();
        results.push(result("t1", "a", &[("a", 0.9), ("b", 0.1)]));
        results.push(result("t2", "a", &[("a", 0.2), ("b", 0.8)]));
        results.push(result("t3", "b", &[("a", 0.1), ("b", 0.9)]));
        results.finalize();

        let matrix = results.confusion_matrix();
        assert_eq!(matrix.authors(), &["a".to_string(), "b".to_string()]);
        // rows actual, columns predicted
        assert_eq!(matrix.count("a", "a"), 1);
        assert_eq!(matrix.count("a", "b"), 1);
        assert_eq!(matrix.count("b", "b"), 1);
        assert_eq!(matrix.count("b", "a"), 0);
        assert_eq!(matrix.total(), results.len() as u64);
        assert_eq!(matrix.trace(), 2);
        assert!((matrix.accuracy() - results.accuracy()).abs() < 1e-12);
    }

    #[test]
    fn failed_documents_are_counted_apart() {
        let mut results = ExperimentResults::new();
        results.push(result("t1", "a", &[("a", 1.0)]));
        results.push_failure(ClassificationFailure {
            title: "t2".to_string(),
            author: "a".to_string(),
            reason: "predict blew up".to_string(),
        });
        results.finalize();
        assert_eq!(results.len(), 1);
        assert_eq!(results.failed_count(), 1);
        assert!(!results.is_complete());
        assert_eq!(results.accuracy(), 1.0);
    }

    #[test]
    fn rendering_carries_headers() {
        let mut results = ExperimentResults::new();
        results.push(result("t1", "alice", &[("alice", 0.7), ("bob", 0.3)]));
        results.finalize();
        let rendered = results.confusion_matrix().to_string();
        assert!(rendered.contains("alice"));
        assert!(rendered.contains("bob"));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn results_serialize_to_json() {
        let mut results = ExperimentResults::new();
        results.push(result("t1", "a", &[("a", 1.0)]));
        results.finalize();
        let json = results.to_json().expect("json");
        assert!(json.contains("\"title\": \"t1\""));
    }
}
