//! The LLM oracle: render a template, ask the model, return the raw reply.
//!
//! Callers classify the reply themselves; the oracle never retries on
//! content. Transport retries live in the gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{CacheError, CachedReply, ReplyCache, ReplyCacheKey};
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::{PromptTemplate, PromptVars};

/// Default per-call deadline.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Output cap for label-only prompts.
pub const LABEL_MAX_OUTPUT_TOKENS: u32 = 16;

/// Raw reply plus usage.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleReply {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub cached: bool,
}

impl OracleReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            cached: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(#[from] ProviderError),
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Capability to answer one prompt.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn query(
        &self,
        template: &PromptTemplate,
        vars: &PromptVars,
    ) -> Result<OracleReply, OracleError>;
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    async fn query(
        &self,
        template: &PromptTemplate,
        vars: &PromptVars,
    ) -> Result<OracleReply, OracleError> {
        (**self).query(template, vars).await
    }
}

/// Oracle backed by a chat model.
pub struct LlmOracle {
    gateway: Arc<dyn ChatGateway>,
    model: String,
    timeout: Duration,
    max_output_tokens: Option<u32>,
    cache: Option<Arc<dyn ReplyCache>>,
    run_id: Option<Uuid>,
    caller: &'static str,
}

impl LlmOracle {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            timeout: DEFAULT_ORACLE_TIMEOUT,
            max_output_tokens: None,
            cache: None,
            run_id: None,
            caller: "oracle::query",
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ReplyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_caller(mut self, caller: &'static str) -> Self {
        self.caller = caller;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn attribution(&self) -> Attribution {
        let attribution = Attribution::new(self.caller);
        match self.run_id {
            Some(id) => attribution.with_run(id),
            None => attribution,
        }
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn query(
        &self,
        template: &PromptTemplate,
        vars: &PromptVars,
    ) -> Result<OracleReply, OracleError> {
        let prompt = template.render(vars);

        let cache_key = self.cache.as_ref().map(|_| {
            ReplyCacheKey::new(
                &self.model,
                template.slug,
                &template.template_hash(),
                &prompt.fingerprint_text(),
            )
        });

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            match cache.get(key).await {
                Ok(Some(hit)) => {
                    return Ok(OracleReply {
                        content: hit.content,
                        input_tokens: 0,
                        output_tokens: 0,
                        cost_nanodollars: 0,
                        cached: true,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "Cache read failed; falling back to live oracle call");
                }
            }
        }

        let mut request = ChatRequest::new(
            ChatModel::new(&self.model),
            prompt.to_messages(),
            self.attribution(),
        )
        .temperature(0.0);
        if let Some(max) = self.max_output_tokens {
            request = request.max_tokens(max);
        }

        let response = tokio::time::timeout(self.timeout, self.gateway.chat(request))
            .await
            .map_err(|_| OracleError::Timeout(self.timeout))??;

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            let entry = CachedReply {
                content: response.content.clone(),
                input_tokens: Some(response.input_tokens),
                output_tokens: Some(response.output_tokens),
                provider_cost_nanodollars: Some(response.cost_nanodollars),
            };
            if let Err(err) = cache.put(key, &entry).await {
                warn!(error = %err, "Cache write failed");
            }
        }

        Ok(OracleReply {
            content: response.content,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_nanodollars: response.cost_nanodollars,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, FinishReason};
    use crate::prompts::PAIRWISE_EN;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedGateway {
        reply: &'static str,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatGateway for FixedGateway {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ChatResponse {
                content: self.reply.to_string(),
                input_tokens: 3,
                output_tokens: 1,
                cost_nanodollars: 7,
                latency: self.delay,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[derive(Default)]
    struct MemoryCache {
        rows: Mutex<HashMap<String, CachedReply>>,
    }

    #[async_trait]
    impl ReplyCache for MemoryCache {
        async fn get(&self, key: &ReplyCacheKey) -> Result<Option<CachedReply>, CacheError> {
            Ok(self.rows.lock().unwrap().get(&key.key_hash).cloned())
        }
        async fn put(&self, key: &ReplyCacheKey, value: &CachedReply) -> Result<(), CacheError> {
            self.rows
                .lock()
                .unwrap()
                .insert(key.key_hash.clone(), value.clone());
            Ok(())
        }
    }

    fn vars() -> PromptVars {
        PromptVars::new()
            .with("question", "q")
            .with("context1", "a")
            .with("context2", "b")
    }

    #[tokio::test]
    async fn reply_content_is_not_trimmed() {
        let gateway = Arc::new(FixedGateway {
            reply: " 1\n",
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let oracle = LlmOracle::new(gateway, "gpt-3.5-turbo");
        let reply = oracle.query(&PAIRWISE_EN, &vars()).await.unwrap();
        assert_eq!(reply.content, " 1\n");
        assert_eq!(reply.cost_nanodollars, 7);
        assert!(!reply.cached);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_times_out() {
        let gateway = Arc::new(FixedGateway {
            reply: "1",
            delay: Duration::from_secs(30),
            calls: AtomicUsize::new(0),
        });
        let oracle = LlmOracle::new(gateway, "gpt-3.5-turbo").with_timeout(Duration::from_secs(5));
        let err = oracle.query(&PAIRWISE_EN, &vars()).await.unwrap_err();
        assert!(matches!(err, OracleError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn second_identical_query_is_served_from_cache() {
        let gateway = Arc::new(FixedGateway {
            reply: "2",
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let oracle = LlmOracle::new(gateway.clone(), "gpt-3.5-turbo")
            .with_cache(Arc::new(MemoryCache::default()));

        let first = oracle.query(&PAIRWISE_EN, &vars()).await.unwrap();
        let second = oracle.query(&PAIRWISE_EN, &vars()).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.content, "2");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }
}
