//! Evaluation datasets: parallel per-question lists.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scoring::EvalSample;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid dataset json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("dataset has no {0}")]
    Missing(&'static str),
    #[error("question {0} has no ground truth")]
    MissingGroundTruth(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub questions: Vec<String>,
    pub contexts: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<Vec<String>>,
    /// A `null` entry marks a question whose ground truth must be generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truths: Option<Vec<Option<String>>>,
}

impl Dataset {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset: Dataset = serde_json::from_str(&text)?;
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn validate(&self) -> Result<(), DatasetError> {
        let expected = self.questions.len();
        let check = |field: &'static str, actual: usize| {
            if actual == expected {
                Ok(())
            } else {
                Err(DatasetError::LengthMismatch {
                    field,
                    expected,
                    actual,
                })
            }
        };
        check("contexts", self.contexts.len())?;
        if let Some(answers) = &self.answers {
            check("answers", answers.len())?;
        }
        if let Some(ground_truths) = &self.ground_truths {
            check("ground_truths", ground_truths.len())?;
        }
        Ok(())
    }

    /// Indices of questions that still need a ground truth.
    pub fn missing_ground_truths(&self) -> Vec<usize> {
        match &self.ground_truths {
            None => (0..self.len()).collect(),
            Some(gts) => gts
                .iter()
                .enumerate()
                .filter(|(_, gt)| gt.is_none())
                .map(|(i, _)| i)
                .collect(),
        }
    }

    pub fn set_ground_truth(&mut self, index: usize, value: Option<String>) {
        let len = self.len();
        let gts = self.ground_truths.get_or_insert_with(|| vec![None; len]);
        if let Some(slot) = gts.get_mut(index) {
            *slot = value;
        }
    }

    /// Build scoring samples. Requires answers and a ground truth per question.
    pub fn samples(&self) -> Result<Vec<EvalSample>, DatasetError> {
        self.validate()?;
        let answers = self.answers.as_ref().ok_or(DatasetError::Missing("answers"))?;
        let ground_truths = self
            .ground_truths
            .as_ref()
            .ok_or(DatasetError::Missing("ground_truths"))?;

        self.questions
            .iter()
            .enumerate()
            .map(|(i, question)| {
                let ground_truth = ground_truths[i]
                    .clone()
                    .ok_or(DatasetError::MissingGroundTruth(i))?;
                Ok(EvalSample {
                    question: question.clone(),
                    contexts: self.contexts[i].clone(),
                    answer: answers[i].clone(),
                    ground_truth,
                })
            })
            .collect()
    }
}
