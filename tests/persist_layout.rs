use std::sync::Arc;

use ragsort_harness::ground_truth::{GroundTruthGenerator, GroundTruthMode, GroundTruthRecord};
use ragsort_harness::orchestrator::{BatchSettings, Orchestrator};
use ragsort_harness::persist::{
    ground_truth_file_name, read_sorted_results, write_ground_truth, write_scores_csv,
    write_sorted_results, JsonlResultSink,
};
use ragsort_harness::prompts::{PROMPTS_EN, PROMPTS_ZH};
use ragsort_harness::rerank::AmbiguityPolicy;
use ragsort_harness::scoring::{MetricScores, ScoreOutcome, ScoreRecord};
use ragsort_harness::testing::{FnOracle, ScriptedOracle};
use tempfile::tempdir;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn sorted_results_use_the_documented_keys_and_round_trip() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(ScriptedOracle::replies(["1", "1", "2"]));
    let orchestrator = Orchestrator::from_oracle(oracle, &PROMPTS_EN, AmbiguityPolicy::default());
    let results = orchestrator
        .run(&strings(&["q"]), &[strings(&["a", "b"])], &BatchSettings::default())
        .await
        .unwrap();

    let path = dir.path().join("out").join("sorted.json");
    write_sorted_results(&path, &results).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let record = &value[0];
    for key in ["question", "contexts", "good", "bad", "sorted", "quality", "comparisons"] {
        assert!(record.get(key).is_some(), "missing key {key}");
    }
    assert_eq!(record["sorted"], serde_json::json!([0, 1]));

    assert_eq!(read_sorted_results(&path).unwrap(), results);
}

#[tokio::test]
async fn checkpoint_appends_one_line_per_question() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("checkpoint.jsonl");
    let oracle = Arc::new(FnOracle::new(|_, _| Ok("1".to_string())));
    let orchestrator = Orchestrator::from_oracle(oracle, &PROMPTS_EN, AmbiguityPolicy::default())
        .with_checkpoint(Arc::new(JsonlResultSink::new(&path).unwrap()));

    let questions = strings(&["q0", "q1", "q2"]);
    let contexts = vec![strings(&["a"]), strings(&["b", "c"]), strings(&[])];
    orchestrator
        .run(&questions, &contexts, &BatchSettings::default())
        .await
        .unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let indices: Vec<u64> = raw
        .lines()
        .map(|line| {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            v["question_index"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn ground_truth_files_are_named_after_the_question() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(ScriptedOracle::replies(["答案: 东航是航空公司", "不知道"]));
    let generator =
        GroundTruthGenerator::new(oracle, PROMPTS_ZH).with_mode(GroundTruthMode::Exhaustive);

    let questions = strings(&["东方航空是什么?", "unknown/question"]);
    let contexts = vec![strings(&["东航简介"]), strings(&["无关"])];
    let records = generator.generate_batch(&questions, &contexts).await.unwrap();
    assert_eq!(records[0].ground_truth.as_deref(), Some("答案: 东航是航空公司"));
    assert_eq!(records[1].ground_truth, None);

    let paths: Vec<_> = records
        .iter()
        .map(|r| write_ground_truth(dir.path(), r).unwrap())
        .collect();
    let first = paths[0].file_name().unwrap().to_str().unwrap();
    let second = paths[1].file_name().unwrap().to_str().unwrap();
    assert!(first.starts_with("GT_东方航空是什么__"), "{first}");
    assert!(second.starts_with("GT_unknown_question_"), "{second}");
    assert_eq!(second, ground_truth_file_name("unknown/question"));

    let back: GroundTruthRecord =
        serde_json::from_str(&std::fs::read_to_string(&paths[1]).unwrap()).unwrap();
    assert_eq!(back.ground_truth, None);
    assert_eq!(back.contexts, strings(&["无关"]));
}

#[test]
fn questions_that_sanitize_alike_do_not_overwrite_each_other() {
    let dir = tempdir().unwrap();
    for (question, answer) in [("a/b", "first"), ("a:b", "second"), ("a_b", "third")] {
        let record = GroundTruthRecord {
            question: question.to_string(),
            contexts: strings(&["ctx"]),
            ground_truth: Some(answer.to_string()),
        };
        write_ground_truth(dir.path(), &record).unwrap();
    }

    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 3);

    let path = dir.path().join(ground_truth_file_name("a/b"));
    let back: GroundTruthRecord =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(back.question, "a/b");
    assert_eq!(back.ground_truth.as_deref(), Some("first"));
    assert!(dir.path().join("GT_a_b.json").exists());
}

#[test]
fn scores_csv_has_one_row_per_question() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scores.csv");
    let records = vec![
        ScoreRecord {
            question: "what, exactly?".into(),
            requested_k: 10,
            used_k: 4,
            outcome: ScoreOutcome::Scored(MetricScores {
                answer_relevancy: 0.9,
                faithfulness: 1.0,
                context_recall: 0.5,
                context_precision: 0.25,
            }),
        },
        ScoreRecord {
            question: "too long".into(),
            requested_k: 10,
            used_k: 0,
            outcome: ScoreOutcome::BudgetExceeded {
                limit: 13_000,
                first_context_size: 20_000,
            },
        },
    ];
    write_scores_csv(&path, &records).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("question,requested_k,used_k,status"));
    assert_eq!(lines[1], "\"what, exactly?\",10,4,scored,0.9,1.0,0.5,0.25");
    assert_eq!(lines[2], "too long,10,0,budget_exceeded,,,,");
}
