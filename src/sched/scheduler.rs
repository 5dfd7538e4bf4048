// src/sched/scheduler.rs

//! Round-based batch scheduler.
//!
//! The essential logic is to loop over the step set until every step has
//! been submitted. One round = one full scan of the set followed by a
//! barrier on everything dispatched during that scan:
//!
//! - ready batch steps are dispatched to the execution pool,
//! - streaming steps are skipped (they are materialized by the streaming
//!   coordinator and only appear here as pre-submitted dependency sources),
//! - the first ready loop step ends the scan; its unroll replaces the
//!   working set after the barrier, since the set must not change while it
//!   is being scanned.
//!
//! Submission results are applied at the barrier, so a round's outputs are
//! visible before the next scan decides readiness of their dependents. A
//! scan that dispatches nothing and unrolls nothing while unsubmitted
//! steps remain is a stall and aborts with an error instead of spinning.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::accum::Accumulators;
use crate::data::Dataset;
use crate::errors::{PipedagError, Result};
use crate::exec::{StepRunner, SubmitRequest};
use crate::sched::pool::{ExecutionPool, StepHandle};
use crate::step::{unroll, Step, StepName, StepSet};

/// Decisions from one scan: which steps to dispatch, and at most one loop
/// to unroll once the round's barrier has passed.
#[derive(Debug, Default)]
struct ScanDecision {
    dispatch: Vec<StepName>,
    unroll: Option<StepName>,
}

pub struct BatchScheduler<R: StepRunner> {
    pool: Arc<ExecutionPool>,
    runner: Arc<R>,
    accumulators: Accumulators,
}

impl<R: StepRunner> BatchScheduler<R> {
    /// The accumulator registry is a constructor argument so it provably
    /// exists before the first round runs.
    pub fn new(pool: Arc<ExecutionPool>, runner: Arc<R>, accumulators: Accumulators) -> Self {
        Self {
            pool,
            runner,
            accumulators,
        }
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    /// Drive `steps` to full submission in dependency order.
    pub async fn run(&self, steps: &mut StepSet) -> Result<()> {
        debug!(steps = %steps.names_joined(), "started batch pass");

        while !steps.all_submitted() {
            let decision = scan(steps);

            let mut handles = Vec::with_capacity(decision.dispatch.len());
            for name in decision.dispatch {
                handles.push(self.dispatch(steps, name)?);
            }
            let dispatched = handles.len();

            // Barrier: everything dispatched this round finishes before the
            // next scan, even when one of them fails.
            let completed = await_round(handles).await?;
            for (name, data) in completed {
                debug!(step = %name, "step submission finished");
                steps.mark_submitted(&name, data)?;
            }

            if let Some(loop_name) = decision.unroll {
                info!(step = %loop_name, "unrolling loop step");
                *steps = unroll(&loop_name, steps)?;
                continue;
            }

            if dispatched == 0 && !steps.all_submitted() {
                let stuck: Vec<&str> = steps
                    .iter()
                    .filter(|s| !s.has_submitted())
                    .map(|s| s.name())
                    .collect();
                warn!(?stuck, "scan made no progress");
                return Err(PipedagError::SchedulingStall(format!(
                    "no step became ready; still waiting on: {}",
                    stuck.join(", ")
                )));
            }
        }

        debug!(steps = %steps.names_joined(), "finished batch pass");
        Ok(())
    }

    fn dispatch(&self, steps: &StepSet, name: StepName) -> Result<StepHandle> {
        let request = self.submit_request(steps, &name)?;
        let work = self.runner.submit(request);
        Ok(self.pool.submit(name, work))
    }

    fn submit_request(&self, steps: &StepSet, name: &str) -> Result<SubmitRequest> {
        let step = steps
            .get(name)
            .ok_or_else(|| PipedagError::StepNotFound(name.to_string()))?;

        let dependencies = steps
            .dependencies_of(name)
            .into_iter()
            .map(|dep| {
                let data = steps
                    .get(&dep)
                    .and_then(Step::data)
                    .cloned()
                    .unwrap_or_else(Dataset::empty);
                (dep, data)
            })
            .collect();

        Ok(SubmitRequest {
            name: name.to_string(),
            config: step.config().clone(),
            dependencies,
            accumulators: self.accumulators.clone(),
        })
    }
}

/// One full scan over the set. Decide first, mutate later: the scan reads
/// a fixed snapshot of submitted flags and returns its decisions, and the
/// caller applies them once the scan is over.
fn scan(steps: &StepSet) -> ScanDecision {
    let mut decision = ScanDecision::default();

    for step in steps.iter() {
        match step {
            Step::Batch(batch) => {
                if batch.submitted {
                    continue;
                }
                if steps.deps_submitted(&batch.name) {
                    debug!(step = %batch.name, "dependencies submitted; dispatching");
                    decision.dispatch.push(batch.name.clone());
                } else {
                    debug!(step = %batch.name, "dependencies not yet submitted");
                }
            }
            Step::Streaming(_) => {
                // Streaming steps are never submitted by this scheduler;
                // the streaming coordinator materializes them.
            }
            Step::Loop(loop_step) => {
                if steps.deps_submitted(&loop_step.name) {
                    debug!(step = %loop_step.name, "loop dependencies submitted; ending scan");
                    // The set will be structurally replaced after the
                    // barrier, so nothing later in this scan may dispatch.
                    decision.unroll = Some(loop_step.name.clone());
                    break;
                }
                debug!(step = %loop_step.name, "loop dependencies not yet submitted");
            }
        }
    }

    decision
}

/// Await every handle of the round, then surface the first failure. Sibling
/// submissions are never abandoned mid-flight: a failed round still waits
/// for all of its dispatched work before the error propagates.
async fn await_round(handles: Vec<StepHandle>) -> Result<Vec<(StepName, Dataset)>> {
    let mut completed = Vec::with_capacity(handles.len());
    let mut first_err: Option<PipedagError> = None;

    for handle in handles {
        let (name, result) = handle.join().await;
        match result {
            Ok(data) => completed.push((name, data)),
            Err(e) => {
                warn!(step = %name, error = %e, "step submission failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(completed),
    }
}
