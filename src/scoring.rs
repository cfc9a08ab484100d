//! Answer scoring against an external metric service.
//!
//! The service computes answer relevancy, faithfulness, context recall and
//! context precision. This module trims each sample's contexts to a size
//! budget before sending it.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::{info, warn};

pub const SCORER_URL_ENV: &str = "RAGSORT_SCORER_URL";

/// Maximum scorer response body (256KB).
const MAX_RESPONSE_LEN: usize = 256 * 1024;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSample {
    pub question: String,
    pub contexts: Vec<String>,
    pub answer: String,
    pub ground_truth: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScores {
    pub answer_relevancy: f64,
    pub faithfulness: f64,
    pub context_recall: f64,
    pub context_precision: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScoreOutcome {
    Scored(MetricScores),
    /// Even the first context alone is over budget.
    BudgetExceeded {
        limit: usize,
        first_context_size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub question: String,
    pub requested_k: usize,
    pub used_k: usize,
    pub outcome: ScoreOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scorer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid scorer response: {0}")]
    InvalidResponse(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("question {question_index}: {source}")]
    Question {
        question_index: usize,
        source: Box<ScoringError>,
    },
}

// =============================================================================
// Context budget
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetUnit {
    #[default]
    Chars,
    /// cl100k_base tokens.
    Tokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub unit: BudgetUnit,
    /// Total size must stay strictly below this.
    pub limit: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            unit: BudgetUnit::Chars,
            limit: 13_000,
        }
    }
}

static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| cl100k_base().ok());

/// Count cl100k_base tokens; falls back to chars/4 if the tokenizer fails to load.
pub fn count_tokens(text: &str) -> usize {
    match CL100K.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

impl ContextBudget {
    pub fn measure(&self, text: &str) -> usize {
        match self.unit {
            BudgetUnit::Chars => text.chars().count(),
            BudgetUnit::Tokens => count_tokens(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetFit {
    /// Use the first `k` contexts.
    Fits { k: usize },
    Exceeded { first_context_size: usize },
}

/// Largest `k' <= min(k, len)` whose first `k'` contexts total under the limit.
pub fn fit_contexts<S: AsRef<str>>(contexts: &[S], k: usize, budget: &ContextBudget) -> BudgetFit {
    let k = k.min(contexts.len());
    let sizes: Vec<usize> = contexts[..k]
        .iter()
        .map(|c| budget.measure(c.as_ref()))
        .collect();
    let mut total: usize = sizes.iter().sum();
    let mut used = k;
    while used > 0 && total >= budget.limit {
        used -= 1;
        total -= sizes[used];
    }
    if used == 0 && k > 0 {
        BudgetFit::Exceeded {
            first_context_size: sizes[0],
        }
    } else {
        BudgetFit::Fits { k: used }
    }
}

// =============================================================================
// Scorers
// =============================================================================

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, sample: &EvalSample) -> Result<MetricScores, ScoringError>;
}

/// POSTs each sample as JSON and reads the four metrics back.
#[derive(Debug, Clone)]
pub struct HttpScorer {
    client: reqwest::Client,
    url: String,
}

impl HttpScorer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ScoringError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| ScoringError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_env(timeout: Duration) -> Result<Self, ScoringError> {
        let url = std::env::var(SCORER_URL_ENV)
            .map_err(|_| ScoringError::Config(format!("{SCORER_URL_ENV} not set")))?;
        Self::new(url, timeout)
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(&self, sample: &EvalSample) -> Result<MetricScores, ScoringError> {
        let response = self.client.post(&self.url).json(sample).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if bytes.len() > MAX_RESPONSE_LEN {
            return Err(ScoringError::InvalidResponse(format!(
                "response too large: {} bytes",
                bytes.len()
            )));
        }
        let body = String::from_utf8_lossy(&bytes);
        if !status.is_success() {
            return Err(ScoringError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        serde_json::from_str(&body).map_err(|e| ScoringError::InvalidResponse(e.to_string()))
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Score every sample in order. A scorer failure aborts the batch; a
/// budget overrun is recorded for that question only.
pub async fn score_batch(
    scorer: &dyn Scorer,
    samples: &[EvalSample],
    k: usize,
    budget: &ContextBudget,
) -> Result<Vec<ScoreRecord>, ScoringError> {
    let mut records = Vec::with_capacity(samples.len());
    for (question_index, sample) in samples.iter().enumerate() {
        info!("question {}/{}", question_index + 1, samples.len());
        let record = match fit_contexts(&sample.contexts, k, budget) {
            BudgetFit::Exceeded { first_context_size } => {
                warn!(
                    question = %sample.question,
                    first_context_size,
                    limit = budget.limit,
                    "first context alone exceeds the scoring budget"
                );
                ScoreRecord {
                    question: sample.question.clone(),
                    requested_k: k,
                    used_k: 0,
                    outcome: ScoreOutcome::BudgetExceeded {
                        limit: budget.limit,
                        first_context_size,
                    },
                }
            }
            BudgetFit::Fits { k: used_k } => {
                if used_k < k {
                    warn!(
                        question = %sample.question,
                        requested = k,
                        used = used_k,
                        "top-k contexts exceed the scoring budget; reducing k"
                    );
                }
                let trimmed = EvalSample {
                    contexts: sample.contexts[..used_k].to_vec(),
                    ..sample.clone()
                };
                let scores = scorer.score(&trimmed).await.map_err(|source| {
                    ScoringError::Question {
                        question_index,
                        source: Box::new(source),
                    }
                })?;
                ScoreRecord {
                    question: sample.question.clone(),
                    requested_k: k,
                    used_k,
                    outcome: ScoreOutcome::Scored(scores),
                }
            }
        };
        records.push(record);
    }
    Ok(records)
}
