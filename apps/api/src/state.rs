use std::sync::Arc;

use crate::config::Config;
use crate::llm_client::pool::CallPool;
use crate::llm_client::LlmProvider;
use crate::storage::{PersonaDirectory, ResultStore};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResultStore>,
    pub personas: Arc<dyn PersonaDirectory>,
    pub llm: Arc<dyn LlmProvider>,
    /// Process-wide cap on concurrent LLM calls, sized once at startup.
    pub call_pool: CallPool,
    pub config: Config,
}

#[cfg(test)]
impl AppState {
    /// In-memory state around a scripted LLM, with instant backoff.
    pub fn for_tests(
        store: Arc<crate::storage::InMemoryResultStore>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        let mut config = Config::for_tests();
        config.evaluation.backoff_base_ms = 0;
        Self {
            store: store.clone(),
            personas: store,
            llm,
            call_pool: CallPool::new(config.llm_max_concurrency),
            config,
        }
    }
}
