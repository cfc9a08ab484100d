use std::time::Duration;

use ragsort_harness::scoring::{
    score_batch, BudgetUnit, ContextBudget, EvalSample, HttpScorer, ScoreOutcome, ScoringError,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample(question: &str, contexts: &[&str]) -> EvalSample {
    EvalSample {
        question: question.to_string(),
        contexts: contexts.iter().map(|c| c.to_string()).collect(),
        answer: "answer".to_string(),
        ground_truth: "truth".to_string(),
    }
}

fn scorer_for(server: &MockServer) -> HttpScorer {
    HttpScorer::new(format!("{}/score", server.uri()), Duration::from_secs(5)).unwrap()
}

fn metrics() -> serde_json::Value {
    json!({
        "answer_relevancy": 0.91,
        "faithfulness": 0.8,
        "context_recall": 0.75,
        "context_precision": 0.5
    })
}

#[tokio::test]
async fn http_scorer_posts_trimmed_contexts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .and(body_partial_json(json!({ "question": "q", "contexts": ["aaaa", "bbbb"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics()))
        .expect(1)
        .mount(&server)
        .await;

    let scorer = scorer_for(&server);
    let budget = ContextBudget {
        unit: BudgetUnit::Chars,
        limit: 10,
    };
    let records = score_batch(&scorer, &[sample("q", &["aaaa", "bbbb", "cccc"])], 3, &budget)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].requested_k, 3);
    assert_eq!(records[0].used_k, 2);
    match &records[0].outcome {
        ScoreOutcome::Scored(m) => {
            assert_eq!(m.answer_relevancy, 0.91);
            assert_eq!(m.context_precision, 0.5);
        }
        other => panic!("expected scores, got {other:?}"),
    }
}

#[tokio::test]
async fn budget_overrun_skips_the_scorer_for_that_question() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metrics()))
        .expect(1)
        .mount(&server)
        .await;

    let scorer = scorer_for(&server);
    let budget = ContextBudget {
        unit: BudgetUnit::Chars,
        limit: 5,
    };
    let samples = [sample("long", &["0123456789"]), sample("short", &["ab"])];
    let records = score_batch(&scorer, &samples, 10, &budget).await.unwrap();

    assert_eq!(
        records[0].outcome,
        ScoreOutcome::BudgetExceeded {
            limit: 5,
            first_context_size: 10
        }
    );
    assert_eq!(records[0].used_k, 0);
    assert!(matches!(records[1].outcome, ScoreOutcome::Scored(_)));
}

#[tokio::test]
async fn scorer_failure_aborts_with_question_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let scorer = scorer_for(&server);
    let err = score_batch(&scorer, &[sample("q", &["a"])], 1, &ContextBudget::default())
        .await
        .unwrap_err();

    match err {
        ScoringError::Question {
            question_index,
            source,
        } => {
            assert_eq!(question_index, 0);
            assert!(matches!(*source, ScoringError::Status { status: 502, .. }));
        }
        other => panic!("expected a per-question error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_scorer_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "faithfulness": 1.0 })))
        .mount(&server)
        .await;

    let scorer = scorer_for(&server);
    let err = score_batch(&scorer, &[sample("q", &["a"])], 1, &ContextBudget::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Question { source, .. } if matches!(*source, ScoringError::InvalidResponse(_))
    ));
}

#[test]
fn token_budget_counts_fewer_units_than_chars() {
    let text = "The quick brown fox jumps over the lazy dog.";
    let tokens = ContextBudget {
        unit: BudgetUnit::Tokens,
        limit: 100,
    };
    let measured = tokens.measure(text);
    assert!(measured > 0);
    assert!(measured < text.chars().count());
}
