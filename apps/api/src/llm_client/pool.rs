use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::llm_client::LlmError;

/// Process-wide bound on concurrent external calls. Built once at startup and
/// cloned into every run; all clones share the same permits.
#[derive(Clone, Debug)]
pub struct CallPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl CallPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, LlmError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LlmError::Cancelled)
    }
}
