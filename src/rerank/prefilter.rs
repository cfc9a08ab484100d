//! Answerability pre-filter.
//!
//! One oracle call per document, sequential. Splits indices into `good`
//! (can answer) and `bad`, both in original order.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::oracle::{Oracle, OracleError};
use crate::prompts::{PromptTemplate, PromptVars, ANSWERABLE_ZH};

use super::comparison::CallUsage;
use super::trace::{now_epoch_ms, OracleTrace, TraceKind, TraceScope};
use super::verdict::{
    parse_relevance, AmbiguityPolicy, DegradedCounts, ParseQuality, RelevanceVerdict,
};

/// Outcome of classifying one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: RelevanceVerdict,
    pub quality: ParseQuality,
    /// Verdict after the ambiguity policy.
    pub included: bool,
    pub raw: Option<String>,
    pub usage: CallUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub good: Vec<usize>,
    pub bad: Vec<usize>,
    pub degraded: DegradedCounts,
}

#[derive(Clone)]
pub struct Prefilter {
    oracle: Arc<dyn Oracle>,
    template: PromptTemplate,
    policy: AmbiguityPolicy,
}

impl Prefilter {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            template: ANSWERABLE_ZH,
            policy: AmbiguityPolicy::default(),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_policy(mut self, policy: AmbiguityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn classify_one(
        &self,
        question: &str,
        doc: &str,
    ) -> Result<Classification, OracleError> {
        let vars = PromptVars::new()
            .with("question", question)
            .with("context", doc);

        let (verdict, quality, raw, usage) = match self.oracle.query(&self.template, &vars).await {
            Ok(reply) => {
                let (verdict, quality) = parse_relevance(&reply.content);
                let usage = CallUsage::from(&reply);
                (verdict, quality, Some(reply.content), usage)
            }
            Err(OracleError::Timeout(after)) => {
                warn!(
                    timeout_ms = after.as_millis() as u64,
                    "Relevance check timed out"
                );
                (
                    RelevanceVerdict::Ambiguous,
                    ParseQuality::TimedOut,
                    None,
                    CallUsage::default(),
                )
            }
            Err(err) => return Err(err),
        };

        if matches!(quality, ParseQuality::Fallback | ParseQuality::Unparsed) {
            warn!(
                raw = raw.as_deref().unwrap_or(""),
                quality = quality.as_str(),
                "Degraded relevance reply"
            );
        }

        Ok(Classification {
            verdict,
            quality,
            included: self.policy.resolve_relevance(verdict),
            raw,
            usage,
        })
    }

    pub async fn classify<S: AsRef<str>>(
        &self,
        question: &str,
        docs: &[S],
        trace: Option<&TraceScope>,
    ) -> Result<Partition, OracleError> {
        let mut partition = Partition::default();
        for (index, doc) in docs.iter().enumerate() {
            let c = self.classify_one(question, doc.as_ref()).await?;
            partition.degraded.record(c.quality);
            if c.included {
                partition.good.push(index);
            } else {
                partition.bad.push(index);
            }
            if let Some(trace) = trace {
                trace.emit(OracleTrace {
                    timestamp_ms: now_epoch_ms(),
                    question_index: trace.question_index(),
                    kind: TraceKind::Classify,
                    doc_a: index,
                    doc_b: None,
                    template_slug: self.template.slug.to_string(),
                    verdict: verdict_label(c.verdict).to_string(),
                    quality: c.quality.as_str().to_string(),
                    raw: c.raw,
                    cached: c.usage.cached,
                    input_tokens: c.usage.input_tokens,
                    output_tokens: c.usage.output_tokens,
                    provider_cost_nanodollars: c.usage.provider_cost_nanodollars,
                });
            }
        }
        Ok(partition)
    }
}

fn verdict_label(verdict: RelevanceVerdict) -> &'static str {
    match verdict {
        RelevanceVerdict::Answerable => "answerable",
        RelevanceVerdict::NotAnswerable => "not_answerable",
        RelevanceVerdict::Ambiguous => "ambiguous",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::verdict::{Preference, RelevanceDefault};
    use crate::testing::ScriptedOracle;

    #[tokio::test]
    async fn replies_partition_in_original_order() {
        let oracle = Arc::new(ScriptedOracle::replies(["0", "1", "yes 1", "x", "no: 0"]));
        let docs = ["d0", "d1", "d2", "d3", "d4"];
        let p = Prefilter::new(oracle.clone())
            .classify("q", &docs, None)
            .await
            .unwrap();

        assert_eq!(p.good, vec![1, 2]);
        assert_eq!(p.bad, vec![0, 3, 4]);
        assert_eq!(p.degraded.fallback, 2);
        assert_eq!(p.degraded.unparsed, 1);
        assert_eq!(oracle.calls(), 5);
    }

    #[tokio::test]
    async fn include_policy_keeps_ambiguous_documents() {
        let oracle = Arc::new(ScriptedOracle::replies(["?", "0"]));
        let p = Prefilter::new(oracle)
            .with_policy(AmbiguityPolicy {
                comparison: Preference::Second,
                relevance: RelevanceDefault::Include,
            })
            .classify("q", &["a", "b"], None)
            .await
            .unwrap();
        assert_eq!(p.good, vec![0]);
        assert_eq!(p.bad, vec![1]);
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let oracle = Arc::new(ScriptedOracle::replies(Vec::<String>::new()));
        let docs: [&str; 0] = [];
        let p = Prefilter::new(oracle.clone())
            .classify("q", &docs, None)
            .await
            .unwrap();
        assert!(p.good.is_empty() && p.bad.is_empty());
        assert_eq!(oracle.calls(), 0);
    }
}
