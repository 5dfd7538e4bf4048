// src/sched/pool.rs

//! Bounded execution pool for batch-step submissions.
//!
//! An owned resource created at the start of one pipeline run and passed
//! by reference to the scheduler; capacity comes from
//! `[application].pipeline_threads` (default 20). Submissions beyond the
//! capacity queue on the semaphore; the tasks still spawn immediately so
//! the scheduler can hold a handle per dispatched step.

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::data::Dataset;
use crate::errors::{PipedagError, Result};
use crate::step::StepName;

#[derive(Debug)]
pub struct ExecutionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ExecutionPool {
    /// Create a pool with the given capacity, clamped to at least 1.
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

    /// Dispatch one step's work. At most `capacity` dispatched futures make
    /// progress at any moment; the rest wait for a permit.
    pub fn submit<F>(&self, name: StepName, work: F) -> StepHandle
    where
        F: Future<Output = Result<Dataset>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        debug!(step = %name, "dispatching step to execution pool");

        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| PipedagError::Other(anyhow!("execution pool closed: {e}")))?;
            work.await
        });

        StepHandle { name, handle }
    }
}

/// Handle to one in-flight step submission.
#[derive(Debug)]
pub struct StepHandle {
    name: StepName,
    handle: JoinHandle<Result<Dataset>>,
}

impl StepHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the submission to finish, surfacing the step's own error
    /// or a join failure (worker panic) as the result.
    pub async fn join(self) -> (StepName, Result<Dataset>) {
        let result = match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(PipedagError::Other(anyhow!(
                "step worker task failed: {e}"
            ))),
        };

        (self.name, result)
    }
}
