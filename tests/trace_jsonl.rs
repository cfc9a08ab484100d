use std::sync::Arc;

use ragsort_harness::orchestrator::{BatchSettings, Orchestrator};
use ragsort_harness::prompts::PROMPTS_EN;
use ragsort_harness::rerank::{AmbiguityPolicy, JsonlTraceSink, OracleTrace, TraceKind, TraceSink};
use ragsort_harness::testing::ScriptedOracle;
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct TraceRow {
    question_index: usize,
    kind: String,
    doc_a: usize,
    doc_b: Option<usize>,
    verdict: String,
    quality: String,
    raw: Option<String>,
}

fn make_trace(doc_a: usize) -> OracleTrace {
    OracleTrace {
        timestamp_ms: 0,
        question_index: 0,
        kind: TraceKind::Classify,
        doc_a,
        doc_b: None,
        template_slug: "answerable_en_v1".to_string(),
        verdict: "answerable".to_string(),
        quality: "clean".to_string(),
        raw: Some("1".to_string()),
        cached: false,
        input_tokens: 0,
        output_tokens: 0,
        provider_cost_nanodollars: 0,
    }
}

fn read_rows(path: &std::path::Path) -> Vec<TraceRow> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn jsonl_trace_sink_writes_events_and_flushes_on_join() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    sink.record(make_trace(1)).unwrap();
    sink.record(make_trace(2)).unwrap();

    drop(sink);
    worker.join().unwrap();

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].doc_a, 1);
    assert_eq!(rows[0].kind, "classify");
}

#[tokio::test]
async fn orchestrator_traces_every_oracle_call() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    let sink: Arc<dyn TraceSink> = Arc::new(sink);

    // classify a, b, c -> good [0, 2]; compare 2 vs 0.
    let oracle = Arc::new(ScriptedOracle::replies(["1", "0", "yes 1", "whatever"]));
    let orchestrator = Orchestrator::from_oracle(oracle, &PROMPTS_EN, AmbiguityPolicy::default())
        .with_trace(sink);

    let docs: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    let results = orchestrator
        .run(&["q".to_string()], &[docs], &BatchSettings::default())
        .await
        .unwrap();
    assert_eq!(results[0].order, vec![0, 2]);

    drop(orchestrator);
    worker.join().unwrap();

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.question_index == 0));

    let kinds: Vec<&str> = rows.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["classify", "classify", "classify", "compare"]);
    assert_eq!(rows[2].quality, "fallback");

    let compare = &rows[3];
    assert_eq!(compare.doc_a, 2);
    assert_eq!(compare.doc_b, Some(0));
    assert_eq!(compare.verdict, "ambiguous");
    assert_eq!(compare.quality, "unparsed");
    assert_eq!(compare.raw.as_deref(), Some("whatever"));
}
