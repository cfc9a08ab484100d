//! Oracle call trace capture for sort runs.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Which kind of oracle call produced a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Classify,
    Compare,
}

#[derive(Debug, Clone, Serialize)]
pub struct OracleTrace {
    pub timestamp_ms: i64,
    pub question_index: usize,
    pub kind: TraceKind,
    /// Document under test (classify) or being inserted (compare).
    pub doc_a: usize,
    /// Already-placed document it was compared against.
    pub doc_b: Option<usize>,
    pub template_slug: String,
    /// Verdict label, e.g. "first", "answerable", "ambiguous".
    pub verdict: String,
    pub quality: String,
    /// Raw reply; absent when the call timed out.
    pub raw: Option<String>,
    pub cached: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub provider_cost_nanodollars: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: OracleTrace) -> Result<(), TraceError>;
}

/// A trace sink bound to one question of a batch.
#[derive(Clone)]
pub struct TraceScope {
    sink: Arc<dyn TraceSink>,
    question_index: usize,
}

impl TraceScope {
    pub fn new(sink: Arc<dyn TraceSink>, question_index: usize) -> Self {
        Self {
            sink,
            question_index,
        }
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    /// Record an event; a failed write is logged and otherwise ignored.
    pub fn emit(&self, mut event: OracleTrace) {
        event.question_index = self.question_index;
        if let Err(err) = self.sink.record(event) {
            warn!(error = %err, "Failed to record oracle trace");
        }
    }
}

#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<OracleTrace>,
}

pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    /// Wait for the writer to drain. Drop every sender clone first.
    pub fn join(mut self) -> Result<(), TraceError> {
        let handle = self.handle.take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("trace worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<OracleTrace>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: OracleTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<OracleTrace>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
