//! Relevance ranking.
//!
//! An oracle first partitions the contexts into answerable and not, then a
//! binary-insertion sort orders the answerable ones by pairwise comparison.
//! The produced order is scored against the pre-filter reference with
//! Spearman correlation and top-k overlap.

pub mod comparison;
pub mod evaluation;
pub mod prefilter;
pub mod quality;
pub mod sorter;
pub mod trace;
pub mod verdict;

pub use comparison::{CallUsage, Comparator, Comparison};
pub use evaluation::{run_synthetic_suite, EvaluationResult, SimulatedOracle, SyntheticCase};
pub use prefilter::{Classification, Partition, Prefilter};
pub use quality::{
    score, spearman, top_k_overlap, KAdjustment, QualityError, QualityReport, FALLBACK_K,
};
pub use sorter::{binary_insertion_sort, ObservedPreferences, SortError, SortOutcome};
pub use trace::{
    JsonlTraceSink, OracleTrace, TraceError, TraceKind, TraceScope, TraceSink, TraceWorker,
};
pub use verdict::{
    AmbiguityPolicy, ComparisonVerdict, DegradedCounts, ParseQuality, Preference, RelevanceDefault,
    RelevanceVerdict,
};
