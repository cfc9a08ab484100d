//! Pairwise relevance comparison.
//!
//! One oracle call per comparison. The reply is classified and never
//! re-queried; a timeout becomes an ambiguous verdict.

use std::sync::Arc;

use tracing::warn;

use crate::oracle::{Oracle, OracleError, OracleReply};
use crate::prompts::{PromptTemplate, PromptVars, PAIRWISE_ZH};

use super::trace::{now_epoch_ms, OracleTrace, TraceKind, TraceScope};
use super::verdict::{
    parse_comparison, AmbiguityPolicy, ComparisonVerdict, ParseQuality, Preference,
};

/// Usage info for a single oracle call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub provider_cost_nanodollars: i64,
    pub cached: bool,
}

impl From<&OracleReply> for CallUsage {
    fn from(reply: &OracleReply) -> Self {
        Self {
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            provider_cost_nanodollars: reply.cost_nanodollars,
            cached: reply.cached,
        }
    }
}

/// Outcome of one comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub verdict: ComparisonVerdict,
    pub quality: ParseQuality,
    /// Verdict after the tie-break.
    pub preference: Preference,
    pub raw: Option<String>,
    pub usage: CallUsage,
}

impl Comparison {
    pub fn prefers_first(&self) -> bool {
        self.preference == Preference::First
    }
}

/// Asks the oracle which of two documents better answers a question.
#[derive(Clone)]
pub struct Comparator {
    oracle: Arc<dyn Oracle>,
    template: PromptTemplate,
    policy: AmbiguityPolicy,
}

impl Comparator {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            template: PAIRWISE_ZH,
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

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub async fn compare(
        &self,
        question: &str,
        doc_a: &str,
        doc_b: &str,
    ) -> Result<Comparison, OracleError> {
        let vars = PromptVars::new()
            .with("question", question)
            .with("context1", doc_a)
            .with("context2", doc_b);

        let (verdict, quality, raw, usage) = match self.oracle.query(&self.template, &vars).await {
            Ok(reply) => {
                let (verdict, quality) = parse_comparison(&reply.content);
                let usage = CallUsage::from(&reply);
                (verdict, quality, Some(reply.content), usage)
            }
            Err(OracleError::Timeout(after)) => {
                warn!(timeout_ms = after.as_millis() as u64, "Comparison timed out");
                (
                    ComparisonVerdict::Ambiguous,
                    ParseQuality::TimedOut,
                    None,
                    CallUsage::default(),
                )
            }
            Err(err) => return Err(err),
        };

        let preference = self.policy.resolve_comparison(verdict);
        if matches!(quality, ParseQuality::Fallback | ParseQuality::Unparsed) {
            warn!(
                raw = raw.as_deref().unwrap_or(""),
                quality = quality.as_str(),
                "Degraded comparison reply"
            );
        }

        Ok(Comparison {
            verdict,
            quality,
            preference,
            raw,
            usage,
        })
    }

    /// Compare documents `a` and `b` of `docs`, emitting a trace event.
    pub(crate) async fn compare_indexed<S: AsRef<str>>(
        &self,
        question: &str,
        docs: &[S],
        a: usize,
        b: usize,
        trace: Option<&TraceScope>,
    ) -> Result<Comparison, OracleError> {
        let comparison = self
            .compare(question, docs[a].as_ref(), docs[b].as_ref())
            .await?;
        if let Some(trace) = trace {
            trace.emit(OracleTrace {
                timestamp_ms: now_epoch_ms(),
                question_index: trace.question_index(),
                kind: TraceKind::Compare,
                doc_a: a,
                doc_b: Some(b),
                template_slug: self.template.slug.to_string(),
                verdict: verdict_label(comparison.verdict).to_string(),
                quality: comparison.quality.as_str().to_string(),
                raw: comparison.raw.clone(),
                cached: comparison.usage.cached,
                input_tokens: comparison.usage.input_tokens,
                output_tokens: comparison.usage.output_tokens,
                provider_cost_nanodollars: comparison.usage.provider_cost_nanodollars,
            });
        }
        Ok(comparison)
    }
}

fn verdict_label(verdict: ComparisonVerdict) -> &'static str {
    match verdict {
        ComparisonVerdict::First => "first",
        ComparisonVerdict::Second => "second",
        ComparisonVerdict::Ambiguous => "ambiguous",
    }
}
