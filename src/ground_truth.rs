//! Reference-answer synthesis from retrieved contexts.
//!
//! Contexts are answered in groups, "unknown" answers are dropped, and the
//! survivors are merged group by group until one answer remains.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{GroundTruthModeKind, GroundTruthSettings};
use crate::oracle::{Oracle, OracleError};
use crate::prompts::{format_context_list, PromptSet, PromptVars};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundTruthMode {
    /// Shuffle, answer `group_size` contexts per call.
    Fast { group_size: usize },
    /// One call per context.
    Exhaustive,
}

#[derive(Debug, thiserror::Error)]
pub enum GroundTruthError {
    #[error("question {question_index}: {source}")]
    Oracle {
        question_index: usize,
        source: OracleError,
    },
    #[error("{questions} questions but {contexts} context lists")]
    LengthMismatch { questions: usize, contexts: usize },
}

/// Persisted ground truth for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub question: String,
    pub contexts: Vec<String>,
    /// Absent when every group answered "unknown".
    pub ground_truth: Option<String>,
}

pub struct GroundTruthGenerator {
    oracle: Arc<dyn Oracle>,
    prompts: PromptSet,
    mode: GroundTruthMode,
    merge_fan_in: usize,
    seed: Option<u64>,
}

impl GroundTruthGenerator {
    pub fn new(oracle: Arc<dyn Oracle>, prompts: PromptSet) -> Self {
        Self {
            oracle,
            prompts,
            mode: GroundTruthMode::Fast { group_size: 20 },
            merge_fan_in: 20,
            seed: None,
        }
    }

    pub fn from_settings(
        oracle: Arc<dyn Oracle>,
        prompts: PromptSet,
        settings: &GroundTruthSettings,
    ) -> Self {
        let mode = match settings.mode {
            GroundTruthModeKind::Fast => GroundTruthMode::Fast {
                group_size: settings.group_size,
            },
            GroundTruthModeKind::Exhaustive => GroundTruthMode::Exhaustive,
        };
        let generator = Self::new(oracle, prompts)
            .with_mode(mode)
            .with_merge_fan_in(settings.group_size);
        match settings.seed {
            Some(seed) => generator.with_seed(seed),
            None => generator,
        }
    }

    pub fn with_mode(mut self, mode: GroundTruthMode) -> Self {
        self.mode = mode;
        self
    }

    /// Answers merged per reduction call. Values below 2 are raised to 2.
    pub fn with_merge_fan_in(mut self, fan_in: usize) -> Self {
        self.merge_fan_in = fan_in.max(2);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Group contexts for the initial answer pass.
    pub fn group_contexts(&self, contexts: &[String]) -> Vec<Vec<String>> {
        match self.mode {
            GroundTruthMode::Exhaustive => contexts.iter().map(|c| vec![c.clone()]).collect(),
            GroundTruthMode::Fast { group_size } => {
                let mut shuffled = contexts.to_vec();
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                shuffled.shuffle(&mut rng);
                shuffled
                    .chunks(group_size.max(1))
                    .map(|chunk| chunk.to_vec())
                    .collect()
            }
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        contexts: &[String],
    ) -> Result<Option<String>, OracleError> {
        let groups = self.group_contexts(contexts);

        let mut answers = Vec::with_capacity(groups.len());
        for group in &groups {
            let vars = PromptVars::new()
                .with("question", question)
                .with("context_list", format_context_list(group));
            let reply = self.oracle.query(&self.prompts.answer, &vars).await?;
            if !reply.content.contains(self.prompts.unknown_marker) {
                answers.push(reply.content);
            }
        }
        info!(
            groups = groups.len(),
            answered = answers.len(),
            "initial answers"
        );

        while answers.len() > 1 {
            let mut merged = Vec::with_capacity(answers.len().div_ceil(self.merge_fan_in));
            for chunk in answers.chunks(self.merge_fan_in) {
                if chunk.len() == 1 {
                    merged.push(chunk[0].clone());
                    continue;
                }
                let vars = PromptVars::new()
                    .with("question", question)
                    .with("context_list", format_context_list(chunk));
                let reply = self.oracle.query(&self.prompts.merge, &vars).await?;
                merged.push(reply.content);
            }
            info!(from = answers.len(), to = merged.len(), "reduced answers");
            answers = merged;
        }

        Ok(answers.pop())
    }

    /// Generate ground truths for a batch, sequentially.
    pub async fn generate_batch(
        &self,
        questions: &[String],
        contexts: &[Vec<String>],
    ) -> Result<Vec<GroundTruthRecord>, GroundTruthError> {
        if questions.len() != contexts.len() {
            return Err(GroundTruthError::LengthMismatch {
                questions: questions.len(),
                contexts: contexts.len(),
            });
        }
        let mut records = Vec::with_capacity(questions.len());
        for (question_index, (question, docs)) in questions.iter().zip(contexts).enumerate() {
            info!("ground truth {}/{}", question_index + 1, questions.len());
            let ground_truth = self
                .generate(question, docs)
                .await
                .map_err(|source| GroundTruthError::Oracle {
                    question_index,
                    source,
                })?;
            records.push(GroundTruthRecord {
                question: question.clone(),
                contexts: docs.clone(),
                ground_truth,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{PROMPTS_EN, PROMPTS_ZH};
    use crate::testing::{FnOracle, ScriptedOracle};

    fn contexts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("ctx{i}")).collect()
    }

    #[test]
    fn fast_mode_groups_with_remainder() {
        let oracle = Arc::new(ScriptedOracle::replies(Vec::<String>::new()));
        let generator = GroundTruthGenerator::new(oracle, PROMPTS_EN)
            .with_mode(GroundTruthMode::Fast { group_size: 20 })
            .with_seed(1);
        let groups = generator.group_contexts(&contexts(45));
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);

        let mut all: Vec<String> = groups.into_iter().flatten().collect();
        all.sort();
        let mut expected = contexts(45);
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let make = || {
            let oracle = Arc::new(ScriptedOracle::replies(Vec::<String>::new()));
            GroundTruthGenerator::new(oracle, PROMPTS_EN)
                .with_mode(GroundTruthMode::Fast { group_size: 4 })
                .with_seed(99)
        };
        assert_eq!(make().group_contexts(&contexts(12)), make().group_contexts(&contexts(12)));
    }

    #[tokio::test]
    async fn unknown_answers_are_dropped_before_reduction() {
        // 3 groups -> answers: unknown, A, B -> one merge of [A, B].
        let oracle = Arc::new(ScriptedOracle::replies([
            "不知道",
            "答案: A",
            "答案: B",
            "答案: AB",
        ]));
        let generator = GroundTruthGenerator::new(oracle.clone(), PROMPTS_ZH)
            .with_mode(GroundTruthMode::Fast { group_size: 2 })
            .with_seed(3);
        let gt = generator.generate("q", &contexts(6)).await.unwrap();
        assert_eq!(gt.as_deref(), Some("答案: AB"));
        assert_eq!(oracle.calls(), 4);
        let merge_vars = &oracle.seen()[3];
        assert_eq!(
            merge_vars.get("context_list"),
            Some("[1] 答案: A\n\n[2] 答案: B")
        );
    }

    #[tokio::test]
    async fn single_answer_needs_no_merge() {
        let oracle = Arc::new(ScriptedOracle::replies(["Answer: only"]));
        let generator = GroundTruthGenerator::new(oracle.clone(), PROMPTS_EN);
        let gt = generator.generate("q", &contexts(3)).await.unwrap();
        assert_eq!(gt.as_deref(), Some("Answer: only"));
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn all_unknown_yields_none() {
        let oracle = Arc::new(FnOracle::new(|_, _| Ok("I don't know".to_string())));
        let generator =
            GroundTruthGenerator::new(oracle, PROMPTS_EN).with_mode(GroundTruthMode::Exhaustive);
        assert_eq!(generator.generate("q", &contexts(4)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reduction_repeats_until_one_answer() {
        // Exhaustive over 5 contexts with fan-in 2:
        // 5 -> [m, m, a] -> [m, a] -> [m]: 5 answers + 4 merges.
        let oracle = Arc::new(FnOracle::new(|template, _| {
            Ok(if template.slug.starts_with("merge") { "merged" } else { "answer" }.to_string())
        }));
        let generator = GroundTruthGenerator::new(oracle.clone(), PROMPTS_EN)
            .with_mode(GroundTruthMode::Exhaustive)
            .with_merge_fan_in(2);
        let gt = generator.generate("q", &contexts(5)).await.unwrap();
        assert_eq!(gt.as_deref(), Some("merged"));
        assert_eq!(oracle.calls(), 9);
    }
}
