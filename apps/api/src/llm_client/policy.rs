//! Per-call policy for external model calls: pool permit, timeout, retry with
//! exponential backoff, and cancellation.

use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use crate::llm_client::pool::CallPool;
use crate::llm_client::{Completion, CompletionRequest, LlmError, LlmProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff_base: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl CallPolicy {
    /// Backoff before retry number `retry` (1-based): base, 2·base, 4·base, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Runs `request` under `policy`. Transient failures (timeout, rate limiting,
/// unavailability) are retried; invalid requests, blank responses and
/// cancellation end the call immediately. The pool permit is held only while
/// the provider is working, never during backoff.
pub async fn call_with_policy(
    llm: &dyn LlmProvider,
    pool: &CallPool,
    policy: &CallPolicy,
    request: &CompletionRequest,
    cancel: &CancellationToken,
    label: &str,
) -> Result<Completion, LlmError> {
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = attempt_once(llm, pool, policy.timeout, request) => result,
        };

        match result {
            Ok(completion) => return Ok(completion),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "LLM call for '{}' failed ({}), retry {}/{} in {}ms",
                    label,
                    e,
                    attempt,
                    policy.max_retries,
                    policy.backoff(attempt).as_millis()
                );
            }
            Err(e) => {
                warn!(
                    "LLM call for '{}' failed after {} attempt(s): {}",
                    label,
                    attempt + 1,
                    e
                );
                return Err(e);
            }
        }
    }
}

async fn attempt_once(
    llm: &dyn LlmProvider,
    pool: &CallPool,
    timeout: Duration,
    request: &CompletionRequest,
) -> Result<Completion, LlmError> {
    let _permit = pool.acquire().await?;
    let completion = tokio::time::timeout(timeout, llm.complete(request))
        .await
        .map_err(|_| LlmError::Timeout(timeout))??;
    if completion.text.trim().is_empty() {
        return Err(LlmError::EmptyContent);
    }
    Ok(completion)
}

/// A cancellation scope for one run: the token fires when `deadline` elapses
/// or when the returned guard is dropped (e.g. the client disconnected and the
/// handler future was dropped).
pub fn deadline_scope(deadline: Duration) -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                warn!("Run deadline of {}s reached, cancelling", deadline.as_secs());
                timer.cancel();
            }
        }
    });
    (token.clone(), token.drop_guard())
}
