//! Oracle reply classification.
//!
//! Replies are matched as given; no trimming or case folding. A label found
//! only as a substring is a [`ParseQuality::Fallback`].

use serde::{Deserialize, Serialize};

/// Which of two documents the oracle picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonVerdict {
    First,
    Second,
    Ambiguous,
}

/// Whether a document can answer the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceVerdict {
    Answerable,
    NotAnswerable,
    Ambiguous,
}

/// How a verdict was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseQuality {
    /// Reply was exactly a label.
    Clean,
    /// Label found as a substring.
    Fallback,
    /// No label in the reply.
    Unparsed,
    /// Oracle call hit its deadline.
    TimedOut,
}

impl ParseQuality {
    pub fn is_degraded(self) -> bool {
        !matches!(self, ParseQuality::Clean)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParseQuality::Clean => "clean",
            ParseQuality::Fallback => "fallback",
            ParseQuality::Unparsed => "unparsed",
            ParseQuality::TimedOut => "timed_out",
        }
    }
}

pub fn parse_comparison(raw: &str) -> (ComparisonVerdict, ParseQuality) {
    match raw {
        "1" => (ComparisonVerdict::First, ParseQuality::Clean),
        "2" => (ComparisonVerdict::Second, ParseQuality::Clean),
        _ if raw.contains('1') => (ComparisonVerdict::First, ParseQuality::Fallback),
        _ if raw.contains('2') => (ComparisonVerdict::Second, ParseQuality::Fallback),
        _ => (ComparisonVerdict::Ambiguous, ParseQuality::Unparsed),
    }
}

pub fn parse_relevance(raw: &str) -> (RelevanceVerdict, ParseQuality) {
    match raw {
        "1" => (RelevanceVerdict::Answerable, ParseQuality::Clean),
        "0" => (RelevanceVerdict::NotAnswerable, ParseQuality::Clean),
        _ if raw.contains('1') => (RelevanceVerdict::Answerable, ParseQuality::Fallback),
        _ if raw.contains('0') => (RelevanceVerdict::NotAnswerable, ParseQuality::Fallback),
        _ => (RelevanceVerdict::Ambiguous, ParseQuality::Unparsed),
    }
}

// =============================================================================
// Ambiguity resolution
// =============================================================================

/// Resolved side of a comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    First,
    #[default]
    Second,
}

/// What an ambiguous relevance verdict counts as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceDefault {
    Include,
    #[default]
    Exclude,
}

/// How ambiguous verdicts are resolved.
///
/// The defaults differ per call type: an ambiguous comparison
/// favours the second document, an ambiguous relevance check excludes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbiguityPolicy {
    pub comparison: Preference,
    pub relevance: RelevanceDefault,
}

impl AmbiguityPolicy {
    pub fn resolve_comparison(&self, verdict: ComparisonVerdict) -> Preference {
        match verdict {
            ComparisonVerdict::First => Preference::First,
            ComparisonVerdict::Second => Preference::Second,
            ComparisonVerdict::Ambiguous => self.comparison,
        }
    }

    pub fn resolve_relevance(&self, verdict: RelevanceVerdict) -> bool {
        match verdict {
            RelevanceVerdict::Answerable => true,
            RelevanceVerdict::NotAnswerable => false,
            RelevanceVerdict::Ambiguous => self.relevance == RelevanceDefault::Include,
        }
    }
}

// =============================================================================
// Degraded counts
// =============================================================================

/// Per-question tally of non-clean verdicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedCounts {
    pub fallback: usize,
    pub unparsed: usize,
    pub timed_out: usize,
}

impl DegradedCounts {
    pub fn record(&mut self, quality: ParseQuality) {
        match quality {
            ParseQuality::Clean => {}
            ParseQuality::Fallback => self.fallback += 1,
            ParseQuality::Unparsed => self.unparsed += 1,
            ParseQuality::TimedOut => self.timed_out += 1,
        }
    }

    pub fn merge(&mut self, other: &DegradedCounts) {
        self.fallback += other.fallback;
        self.unparsed += other.unparsed;
        self.timed_out += other.timed_out;
    }

    pub fn total(&self) -> usize {
        self.fallback + self.unparsed + self.timed_out
    }
}
