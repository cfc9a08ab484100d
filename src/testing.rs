//! In-process oracles for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gateway::ProviderError;
use crate::oracle::{Oracle, OracleError, OracleReply};
use crate::prompts::{PromptTemplate, PromptVars};

/// Replays a fixed sequence of replies, one per call.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<OracleReply, OracleError>>>,
    seen: Mutex<Vec<PromptVars>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<OracleReply, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            replies
                .into_iter()
                .map(|r| Ok(OracleReply::text(r)))
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Variables of every call so far, in call order.
    pub fn seen(&self) -> Vec<PromptVars> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn query(
        &self,
        _template: &PromptTemplate,
        vars: &PromptVars,
    ) -> Result<OracleReply, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(vars.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| {
            Err(OracleError::Unavailable(ProviderError::provider(
                "scripted",
                "script exhausted",
                false,
            )))
        })
    }
}

type Rule = dyn Fn(&PromptTemplate, &PromptVars) -> Result<String, OracleError> + Send + Sync;

/// Answers each call by evaluating a closure over the prompt variables.
pub struct FnOracle {
    rule: Box<Rule>,
    calls: AtomicUsize,
}

impl FnOracle {
    pub fn new<F>(rule: F) -> Self
    where
        F: Fn(&PromptTemplate, &PromptVars) -> Result<String, OracleError> + Send + Sync + 'static,
    {
        Self {
            rule: Box::new(rule),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for FnOracle {
    async fn query(
        &self,
        template: &PromptTemplate,
        vars: &PromptVars,
    ) -> Result<OracleReply, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.rule)(template, vars).map(OracleReply::text)
    }
}
