//! Binary-insertion relevance sort.
//!
//! Each index is inserted into the sorted prefix by binary search, one
//! oracle comparison per search step. The result is most relevant first.
//! Verdicts are taken as given; cyclic preferences are counted, not
//! repaired.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::oracle::OracleError;

use super::comparison::Comparator;
use super::trace::TraceScope;
use super::verdict::DegradedCounts;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortOutcome {
    /// Input indices, most relevant first.
    pub order: Vec<usize>,
    pub comparisons: usize,
    pub degraded: DegradedCounts,
    /// Number of 3-cycles (a>b, b>c, c>a) among observed verdicts.
    pub inconsistent_triples: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SortError {
    #[error("index {index} out of range for {len} documents")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("index {0} appears more than once")]
    DuplicateIndex(usize),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Reject indices that are out of range or repeated.
pub fn validate_indices(indices: &[usize], len: usize) -> Result<(), SortError> {
    let mut seen = HashSet::with_capacity(indices.len());
    for &index in indices {
        if index >= len {
            return Err(SortError::IndexOutOfRange { index, len });
        }
        if !seen.insert(index) {
            return Err(SortError::DuplicateIndex(index));
        }
    }
    Ok(())
}

/// Sort `indices` of `docs` by relevance to `question`.
pub async fn binary_insertion_sort<S: AsRef<str>>(
    comparator: &Comparator,
    question: &str,
    docs: &[S],
    indices: &[usize],
    trace: Option<&TraceScope>,
) -> Result<SortOutcome, SortError> {
    validate_indices(indices, docs.len())?;

    let mut order: Vec<usize> = Vec::with_capacity(indices.len());
    let mut comparisons = 0usize;
    let mut degraded = DegradedCounts::default();
    let mut observed = ObservedPreferences::default();

    for &candidate in indices {
        // Closed range [lo, hi] over the sorted prefix, held as lo..hi_excl
        // so that `mid - 1` never underflows.
        let mut lo = 0usize;
        let mut hi_excl = order.len();
        while lo < hi_excl {
            let mid = (lo + hi_excl - 1) / 2;
            let placed = order[mid];
            let c = comparator
                .compare_indexed(question, docs, candidate, placed, trace)
                .await?;
            comparisons += 1;
            degraded.record(c.quality);
            observed.record(candidate, placed, c.prefers_first());

            if c.prefers_first() {
                hi_excl = mid;
            } else {
                lo = mid + 1;
            }
        }
        order.insert(lo, candidate);
    }

    Ok(SortOutcome {
        order,
        comparisons,
        degraded,
        inconsistent_triples: observed.count_three_cycles(),
    })
}

/// Directed "beats" relation from observed verdicts.
#[derive(Debug, Default)]
pub struct ObservedPreferences {
    // (min, max) -> whether min beat max; the latest verdict wins.
    edges: HashMap<(usize, usize), bool>,
}

impl ObservedPreferences {
    pub fn record(&mut self, a: usize, b: usize, a_wins: bool) {
        if a == b {
            return;
        }
        let (key, min_wins) = if a < b {
            ((a, b), a_wins)
        } else {
            ((b, a), !a_wins)
        };
        self.edges.insert(key, min_wins);
    }

    fn beats(&self, a: usize, b: usize) -> Option<bool> {
        if a < b {
            self.edges.get(&(a, b)).copied()
        } else {
            self.edges.get(&(b, a)).map(|min_wins| !min_wins)
        }
    }

    pub fn count_three_cycles(&self) -> usize {
        let mut wins: HashMap<usize, Vec<usize>> = HashMap::new();
        for (&(a, b), &a_wins) in &self.edges {
            let (winner, loser) = if a_wins { (a, b) } else { (b, a) };
            wins.entry(winner).or_default().push(loser);
        }

        let mut cycles = 0usize;
        for (&a, losers) in &wins {
            for &b in losers {
                let Some(b_losers) = wins.get(&b) else {
                    continue;
                };
                for &c in b_losers {
                    if self.beats(c, a) == Some(true) {
                        cycles += 1;
                    }
                }
            }
        }
        // Each cycle is found once from each of its three nodes.
        cycles / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptVars;
    use crate::testing::{FnOracle, ScriptedOracle};
    use std::sync::Arc;

    fn score_of(vars: &PromptVars, name: &str) -> i64 {
        vars.get(name)
            .and_then(|t| t.trim_start_matches("doc").parse().ok())
            .unwrap_or(0)
    }

    /// Prefers the document with the larger number in its text.
    fn numeric_comparator() -> (Comparator, Arc<FnOracle>) {
        let oracle = Arc::new(FnOracle::new(|_, vars| {
            let a = score_of(vars, "context1");
            let b = score_of(vars, "context2");
            Ok(if a > b { "1" } else { "2" }.to_string())
        }));
        (Comparator::new(oracle.clone()), oracle)
    }

    #[tokio::test]
    async fn sorts_descending_by_oracle_preference() {
        let docs = ["doc3", "doc9", "doc1", "doc7", "doc5"];
        let (comparator, oracle) = numeric_comparator();
        let out = binary_insertion_sort(&comparator, "q", &docs, &[0, 1, 2, 3, 4], None)
            .await
            .unwrap();
        assert_eq!(out.order, vec![1, 3, 4, 0, 2]);
        assert_eq!(out.comparisons, oracle.calls());
        assert_eq!(out.inconsistent_triples, 0);
    }

    #[tokio::test]
    async fn trivial_inputs_make_no_calls() {
        let docs = ["doc1", "doc2"];
        let (comparator, oracle) = numeric_comparator();
        let empty = binary_insertion_sort(&comparator, "q", &docs, &[], None)
            .await
            .unwrap();
        let single = binary_insertion_sort(&comparator, "q", &docs, &[1], None)
            .await
            .unwrap();
        assert!(empty.order.is_empty());
        assert_eq!(single.order, vec![1]);
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn always_second_keeps_input_order() {
        // Every comparison says "2": each new index goes after everything placed.
        let docs = ["a", "b", "c", "d"];
        let oracle = Arc::new(FnOracle::new(|_, _| Ok("2".to_string())));
        let comparator = Comparator::new(oracle);
        let out = binary_insertion_sort(&comparator, "q", &docs, &[2, 0, 3, 1], None)
            .await
            .unwrap();
        assert_eq!(out.order, vec![2, 0, 3, 1]);
    }

    #[tokio::test]
    async fn comparisons_follow_midpoint_of_sorted_prefix() {
        // Three docs: second insertion compares against order[0], third
        // against the midpoint of a two-element prefix, i.e. order[0].
        let docs = ["x", "y", "z"];
        let oracle = Arc::new(ScriptedOracle::replies(["1", "2", "1"]));
        let comparator = Comparator::new(oracle.clone());
        let out = binary_insertion_sort(&comparator, "q", &docs, &[0, 1, 2], None)
            .await
            .unwrap();
        // y beats x -> [1, 0]; z vs 1 -> "2" -> lo=1; z vs 0 -> "1" -> insert at 1.
        assert_eq!(out.order, vec![1, 2, 0]);
        let seen = oracle.seen();
        assert_eq!(seen[0].get("context2"), Some("x"));
        assert_eq!(seen[1].get("context2"), Some("y"));
        assert_eq!(seen[2].get("context2"), Some("x"));
    }

    #[tokio::test]
    async fn invalid_indices_are_rejected_before_any_call() {
        let docs = ["a", "b"];
        let oracle = Arc::new(FnOracle::new(|_, _| Ok("1".to_string())));
        let comparator = Comparator::new(oracle.clone());

        let err = binary_insertion_sort(&comparator, "q", &docs, &[0, 2], None)
            .await
            .unwrap_err();
        assert!(matches!(err, SortError::IndexOutOfRange { index: 2, len: 2 }));

        let err = binary_insertion_sort(&comparator, "q", &docs, &[1, 1], None)
            .await
            .unwrap_err();
        assert!(matches!(err, SortError::DuplicateIndex(1)));
        assert_eq!(oracle.calls(), 0);
    }

    #[test]
    fn three_cycle_is_counted_once() {
        let mut p = ObservedPreferences::default();
        p.record(0, 1, true);
        p.record(1, 2, true);
        p.record(2, 0, true);
        assert_eq!(p.count_three_cycles(), 1);

        p.record(0, 2, true);
        assert_eq!(p.count_three_cycles(), 0);
    }
}
