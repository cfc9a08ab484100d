#![forbid(unsafe_code)]

//! # ragsort-harness
//!
//! LLM-judged context ranking for RAG evaluation.
//!
//! For each question, an oracle model first decides which retrieved contexts
//! can answer it, then a binary-insertion sort orders those contexts by
//! pairwise relevance. The produced order is scored against the pre-filter
//! reference with Spearman correlation and top-k overlap. The crate also
//! synthesizes reference answers from the contexts and sends answers to an
//! external metric service under a context-size budget.

pub mod cache;
pub mod config;
pub mod dataset;
pub mod gateway;
pub mod ground_truth;
pub mod oracle;
pub mod orchestrator;
pub mod persist;
pub mod prompts;
pub mod rerank;
pub mod scoring;
pub mod testing;

pub use cache::{ReplyCache, ReplyCacheKey, SqliteReplyCache};
pub use config::RunConfig;
pub use dataset::Dataset;
pub use gateway::{Attribution, ChatGateway, ProviderGateway, TotalsUsageSink, UsageSink};
pub use ground_truth::{GroundTruthGenerator, GroundTruthMode, GroundTruthRecord};
pub use oracle::{LlmOracle, Oracle, OracleError, OracleReply};
pub use orchestrator::{BatchError, BatchResult, BatchSettings, Orchestrator};
pub use prompts::{PromptLanguage, PromptSet, PromptTemplate, PromptVars};
pub use rerank::{
    binary_insertion_sort, AmbiguityPolicy, Comparator, JsonlTraceSink, Prefilter, QualityReport,
    TraceSink, TraceWorker,
};
pub use scoring::{score_batch, ContextBudget, HttpScorer, Scorer};
