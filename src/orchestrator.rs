//! Batch orchestration: pre-filter, sort and score every question.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RunConfig;
use crate::oracle::{Oracle, OracleError};
use crate::persist::{PersistError, ResultSink};
use crate::prompts::PromptSet;
use crate::rerank::{
    binary_insertion_sort, score, AmbiguityPolicy, Comparator, DegradedCounts, Prefilter,
    QualityError, QualityReport, SortError, TraceScope, TraceSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub k: usize,
    pub from_top: bool,
    pub use_prefilter: bool,
    pub parallel: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            k: 10,
            from_top: true,
            use_prefilter: true,
            parallel: 1,
        }
    }
}

impl From<&RunConfig> for BatchSettings {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            k: cfg.k,
            from_top: cfg.from_top,
            use_prefilter: cfg.prefilter,
            parallel: cfg.parallel,
        }
    }
}

/// Result record for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub question_index: usize,
    pub question: String,
    pub contexts: Vec<String>,
    /// Answerable indices in original order; absent without the pre-filter.
    pub good: Option<Vec<usize>>,
    pub bad: Option<Vec<usize>>,
    /// Ranked indices, most relevant first.
    #[serde(rename = "sorted")]
    pub order: Vec<usize>,
    pub comparisons: usize,
    pub quality: QualityReport,
    pub degraded: DegradedCounts,
    pub inconsistent_triples: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{questions} questions but {contexts} context lists")]
    LengthMismatch { questions: usize, contexts: usize },
    #[error("question {question_index}: {source}")]
    Oracle {
        question_index: usize,
        source: OracleError,
    },
    #[error("question {question_index}: {source}")]
    Sort {
        question_index: usize,
        source: SortError,
    },
    #[error("question {question_index}: {source}")]
    Quality {
        question_index: usize,
        source: QualityError,
    },
    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[from] PersistError),
}

impl BatchError {
    pub fn question_index(&self) -> Option<usize> {
        match self {
            BatchError::Oracle { question_index, .. }
            | BatchError::Sort { question_index, .. }
            | BatchError::Quality { question_index, .. } => Some(*question_index),
            BatchError::LengthMismatch { .. } | BatchError::Checkpoint(_) => None,
        }
    }
}

pub struct Orchestrator {
    prefilter: Prefilter,
    comparator: Comparator,
    trace: Option<Arc<dyn TraceSink>>,
    checkpoint: Option<Arc<dyn ResultSink>>,
}

impl Orchestrator {
    pub fn new(prefilter: Prefilter, comparator: Comparator) -> Self {
        Self {
            prefilter,
            comparator,
            trace: None,
            checkpoint: None,
        }
    }

    /// Pre-filter and comparator sharing one oracle and prompt set.
    pub fn from_oracle(
        oracle: Arc<dyn Oracle>,
        prompts: &PromptSet,
        policy: AmbiguityPolicy,
    ) -> Self {
        let prefilter = Prefilter::new(oracle.clone())
            .with_template(prompts.answerable)
            .with_policy(policy);
        let comparator = Comparator::new(oracle)
            .with_template(prompts.pairwise)
            .with_policy(policy);
        Self::new(prefilter, comparator)
    }

    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn with_checkpoint(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.checkpoint = Some(sink);
        self
    }

    /// Run every question. Output order matches input order.
    pub async fn run(
        &self,
        questions: &[String],
        contexts: &[Vec<String>],
        settings: &BatchSettings,
    ) -> Result<Vec<BatchResult>, BatchError> {
        if questions.len() != contexts.len() {
            return Err(BatchError::LengthMismatch {
                questions: questions.len(),
                contexts: contexts.len(),
            });
        }
        let total = questions.len();

        stream::iter(questions.iter().zip(contexts).enumerate())
            .map(|(index, (question, docs))| {
                self.run_question(index, total, question, docs, settings)
            })
            .buffered(settings.parallel.max(1))
            .try_collect()
            .await
    }

    pub async fn run_question(
        &self,
        question_index: usize,
        total: usize,
        question: &str,
        docs: &[String],
        settings: &BatchSettings,
    ) -> Result<BatchResult, BatchError> {
        info!("question {}/{}", question_index + 1, total);
        let trace = self
            .trace
            .as_ref()
            .map(|sink| TraceScope::new(sink.clone(), question_index));
        let trace = trace.as_ref();

        let mut degraded = DegradedCounts::default();
        let (good, bad, reference) = if settings.use_prefilter {
            let partition = self
                .prefilter
                .classify(question, docs, trace)
                .await
                .map_err(|source| BatchError::Oracle {
                    question_index,
                    source,
                })?;
            info!(good = ?partition.good, bad = ?partition.bad, "pre-filter");
            degraded.merge(&partition.degraded);
            let reference = partition.good.clone();
            (Some(partition.good), Some(partition.bad), reference)
        } else {
            (None, None, (0..docs.len()).collect::<Vec<_>>())
        };

        let outcome = binary_insertion_sort(&self.comparator, question, docs, &reference, trace)
            .await
            .map_err(|source| match source {
                SortError::Oracle(source) => BatchError::Oracle {
                    question_index,
                    source,
                },
                source => BatchError::Sort {
                    question_index,
                    source,
                },
            })?;
        degraded.merge(&outcome.degraded);
        info!(sorted = ?outcome.order, comparisons = outcome.comparisons, "sorted");

        let quality = score(&outcome.order, &reference, settings.k, settings.from_top).map_err(
            |source| BatchError::Quality {
                question_index,
                source,
            },
        )?;
        info!(
            spearman = ?quality.rank_correlation,
            k = quality.effective_k,
            sim = quality.overlap_ratio,
            overlap = ?quality.overlap_set,
            "quality"
        );

        let result = BatchResult {
            question_index,
            question: question.to_string(),
            contexts: docs.to_vec(),
            good,
            bad,
            order: outcome.order,
            comparisons: outcome.comparisons,
            quality,
            degraded,
            inconsistent_triples: outcome.inconsistent_triples,
        };

        if let Some(sink) = &self.checkpoint {
            sink.append(&result)?;
        }
        Ok(result)
    }
}
