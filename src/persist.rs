//! Output files: sorted results, ground truths, scores and checkpoints.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

use crate::ground_truth::GroundTruthRecord;
use crate::orchestrator::BatchResult;
use crate::scoring::{ScoreOutcome, ScoreRecord};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("checkpoint writer poisoned")]
    Poisoned,
}

fn create_parent(path: &Path) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write a value as pretty JSON, non-ASCII kept as is.
pub fn write_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), PersistError> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write one JSON object per line.
pub fn write_jsonl<T: Serialize>(path: impl AsRef<Path>, items: &[T]) -> Result<(), PersistError> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    for item in items {
        let line = serde_json::to_string(item)?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_sorted_results(
    path: impl AsRef<Path>,
    results: &[BatchResult],
) -> Result<(), PersistError> {
    write_json(path, results)
}

pub fn read_sorted_results(path: impl AsRef<Path>) -> Result<Vec<BatchResult>, PersistError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

// =============================================================================
// Ground truth
// =============================================================================

const MAX_STEM_CHARS: usize = 100;
const NAME_HASH_CHARS: usize = 8;

/// `GT_<question>.json`, with path-hostile characters replaced.
///
/// When the stem differs from the question text it gets a short blake3 suffix
/// of the full question, so distinct questions never share a file.
pub fn ground_truth_file_name(question: &str) -> String {
    let mut stem: String = question
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_STEM_CHARS)
        .collect();
    if stem.trim_matches(|c| c == '.' || c == '_').is_empty() {
        stem = "question".to_string();
    }
    if stem == question {
        return format!("GT_{stem}.json");
    }
    let hash = blake3::hash(question.as_bytes()).to_hex();
    format!("GT_{stem}_{}.json", &hash.as_str()[..NAME_HASH_CHARS])
}

pub fn write_ground_truth(
    dir: impl AsRef<Path>,
    record: &GroundTruthRecord,
) -> Result<PathBuf, PersistError> {
    let path = dir.as_ref().join(ground_truth_file_name(&record.question));
    write_json(&path, record)?;
    Ok(path)
}

// =============================================================================
// Scores
// =============================================================================

#[derive(Serialize)]
struct ScoreRow<'a> {
    question: &'a str,
    requested_k: usize,
    used_k: usize,
    status: &'static str,
    answer_relevancy: Option<f64>,
    faithfulness: Option<f64>,
    context_recall: Option<f64>,
    context_precision: Option<f64>,
}

impl<'a> From<&'a ScoreRecord> for ScoreRow<'a> {
    fn from(record: &'a ScoreRecord) -> Self {
        let (status, scores) = match &record.outcome {
            ScoreOutcome::Scored(s) => ("scored", Some(s)),
            ScoreOutcome::BudgetExceeded { .. } => ("budget_exceeded", None),
        };
        Self {
            question: &record.question,
            requested_k: record.requested_k,
            used_k: record.used_k,
            status,
            answer_relevancy: scores.map(|s| s.answer_relevancy),
            faithfulness: scores.map(|s| s.faithfulness),
            context_recall: scores.map(|s| s.context_recall),
            context_precision: scores.map(|s| s.context_precision),
        }
    }
}

const SCORE_HEADER: [&str; 8] = [
    "question",
    "requested_k",
    "used_k",
    "status",
    "answer_relevancy",
    "faithfulness",
    "context_recall",
    "context_precision",
];

/// One row per question; metric columns are empty when scoring was skipped.
pub fn write_scores_csv(
    path: impl AsRef<Path>,
    records: &[ScoreRecord],
) -> Result<(), PersistError> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(SCORE_HEADER)?;
    for record in records {
        writer.serialize(ScoreRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Checkpoints
// =============================================================================

/// Receives each finished question as soon as it completes.
pub trait ResultSink: Send + Sync {
    fn append(&self, result: &BatchResult) -> Result<(), PersistError>;
}

/// Appends results to a JSONL file, flushing after every line.
pub struct JsonlResultSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlResultSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        create_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl ResultSink for JsonlResultSink {
    fn append(&self, result: &BatchResult) -> Result<(), PersistError> {
        let line = serde_json::to_string(result)?;
        let mut writer = self.writer.lock().map_err(|_| PersistError::Poisoned)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffix(question: &str) -> String {
        blake3::hash(question.as_bytes()).to_hex().as_str()[..NAME_HASH_CHARS].to_string()
    }

    #[test]
    fn clean_questions_keep_their_own_name() {
        assert_eq!(
            ground_truth_file_name("东方航空主营业务"),
            "GT_东方航空主营业务.json"
        );
    }

    #[test]
    fn altered_names_carry_a_question_hash() {
        assert_eq!(
            ground_truth_file_name("a/b: c?"),
            format!("GT_a_b_ c__{}.json", suffix("a/b: c?"))
        );
        assert_eq!(
            ground_truth_file_name(" ../ "),
            format!("GT_question_{}.json", suffix(" ../ "))
        );
        let long = "x".repeat(300);
        assert_eq!(
            ground_truth_file_name(&long).len(),
            "GT_.json".len() + MAX_STEM_CHARS + 1 + NAME_HASH_CHARS
        );
    }

    #[test]
    fn questions_that_sanitize_alike_get_distinct_files() {
        let names: std::collections::HashSet<_> = ["a/b", "a:b", "a_b", " a_b"]
            .iter()
            .map(|q| ground_truth_file_name(q))
            .collect();
        assert_eq!(names.len(), 4);

        let long_a = format!("{}a", "x".repeat(MAX_STEM_CHARS));
        let long_b = format!("{}b", "x".repeat(MAX_STEM_CHARS));
        assert_ne!(ground_truth_file_name(&long_a), ground_truth_file_name(&long_b));
    }
}
