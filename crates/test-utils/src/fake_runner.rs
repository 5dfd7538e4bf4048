use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value as JsonValue};

use pipedag::data::Dataset;
use pipedag::errors::{PipedagError, Result};
use pipedag::exec::{StepRunner, SubmitRequest};

/// One observed submission: which step ran and what dependency data it saw.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub name: String,
    pub dependencies: Vec<(String, Vec<JsonValue>)>,
}

/// A fake step runner that:
/// - records start/finish order and full submission records
/// - tracks the maximum number of concurrently running submissions
/// - produces a single-row dataset naming the step (`{"step": <name>}`)
/// - can be scripted to fail specific steps or to sleep per submission.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    state: Arc<RunnerState>,
}

#[derive(Default)]
struct RunnerState {
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    records: Mutex<Vec<SubmissionRecord>>,
    failures: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future submission of `name` fail.
    pub fn fail_step(&self, name: &str) {
        self.state.failures.lock().unwrap().insert(name.to_string());
    }

    /// Sleep this long inside every submission (for concurrency tests).
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    /// Step names in the order their submissions started.
    pub fn started(&self) -> Vec<String> {
        self.state.started.lock().unwrap().clone()
    }

    /// Step names in the order their submissions finished.
    pub fn finished(&self) -> Vec<String> {
        self.state.finished.lock().unwrap().clone()
    }

    /// Every submission with the dependency data it observed.
    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.state.records.lock().unwrap().clone()
    }

    /// How many times `name` was submitted.
    pub fn run_count(&self, name: &str) -> usize {
        self.state
            .started
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    /// Highest number of submissions observed running at the same time.
    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }
}

impl StepRunner for RecordingRunner {
    fn submit(
        &self,
        request: SubmitRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Dataset>> + Send + 'static>> {
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            state.started.lock().unwrap().push(request.name.clone());

            let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_active.fetch_max(active, Ordering::SeqCst);

            let delay = *state.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            state.active.fetch_sub(1, Ordering::SeqCst);

            state.records.lock().unwrap().push(SubmissionRecord {
                name: request.name.clone(),
                dependencies: request
                    .dependencies
                    .iter()
                    .map(|(dep, data)| (dep.clone(), data.rows().to_vec()))
                    .collect(),
            });
            state.finished.lock().unwrap().push(request.name.clone());

            let failed = state.failures.lock().unwrap().contains(&request.name);
            if failed {
                return Err(PipedagError::StepFailed {
                    step: request.name,
                    source: anyhow::anyhow!("scripted failure"),
                });
            }

            Ok(Dataset::from_rows(vec![json!({ "step": request.name })]))
        })
    }
}
