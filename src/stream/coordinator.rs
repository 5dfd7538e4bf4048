// src/stream/coordinator.rs

//! Streaming coordinator: bridges externally clocked micro-batch arrivals
//! to the finite batch scheduler.
//!
//! Startup runs the independent non-streaming prefix once, so static
//! lookup data exists before the first micro-batch. After that the
//! coordinator is an event loop: each micro-batch materializes its
//! streaming step, runs the transitive dependent subgraph through the
//! batch scheduler, then re-arms the subgraph (submitted/data reset) so
//! the next micro-batch starts clean. Per streaming step the cycle is
//! IDLE -> DATA_ARRIVED -> SUBGRAPH_RUNNING -> RESET -> IDLE, repeating
//! until shutdown.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::data::{Dataset, Record, Schema};
use crate::errors::Result;
use crate::exec::StepRunner;
use crate::sched::BatchScheduler;
use crate::step::{StepName, StepSet};
use crate::stream::source::StreamEvent;

pub struct StreamingCoordinator<R: StepRunner> {
    scheduler: BatchScheduler<R>,
    steps: StepSet,
    /// Schema per streaming step, captured from its source at setup time.
    schemas: HashMap<StepName, Schema>,
    event_rx: mpsc::Receiver<StreamEvent>,
}

impl<R: StepRunner> StreamingCoordinator<R> {
    pub fn new(
        scheduler: BatchScheduler<R>,
        steps: StepSet,
        schemas: HashMap<StepName, Schema>,
        event_rx: mpsc::Receiver<StreamEvent>,
    ) -> Self {
        Self {
            scheduler,
            steps,
            schemas,
            event_rx,
        }
    }

    /// Current step state, for inspection once the loop has ended.
    pub fn steps(&self) -> &StepSet {
        &self.steps
    }

    /// Run the coordinator until shutdown or failure.
    ///
    /// A failure while processing one micro-batch's subgraph still re-arms
    /// the subgraph, then propagates: re-arm cycles are independent of
    /// each other, but there is no retry policy at this layer.
    pub async fn run(&mut self) -> Result<()> {
        info!("streaming coordinator started");

        self.run_independent_prefix().await?;

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("stream event channel closed; exiting");
                    break;
                }
            };

            match event {
                StreamEvent::MicroBatch { step, rows } => {
                    debug!(step = %step, rows = rows.len(), "micro-batch arrived");
                    self.handle_micro_batch(step, rows).await?;
                }
                StreamEvent::Shutdown => {
                    info!("shutdown requested; stopping streaming coordinator");
                    break;
                }
            }
        }

        info!("streaming coordinator exiting");
        Ok(())
    }

    /// Run the non-streaming steps with no transitive dependency on any
    /// streaming step, once. Their submitted state persists for the whole
    /// process and is never re-armed.
    async fn run_independent_prefix(&mut self) -> Result<()> {
        let prefix = self.steps.independent_non_streaming();
        if prefix.is_empty() {
            debug!("no independent non-streaming steps");
            return Ok(());
        }

        info!(steps = ?prefix, "running independent non-streaming prefix");

        let mut sub = self.steps.scoped_subset(&prefix);
        self.scheduler.run(&mut sub).await?;

        // Unroll replacements performed during the prefix pass become
        // permanent; the prefix only ever runs once.
        self.steps.absorb(&prefix, sub);
        Ok(())
    }

    async fn handle_micro_batch(&mut self, name: StepName, rows: Vec<Record>) -> Result<()> {
        let is_streaming = self
            .steps
            .get(&name)
            .map(|step| step.is_streaming())
            .unwrap_or(false);
        if !is_streaming {
            warn!(step = %name, "micro-batch for unknown or non-streaming step; ignoring");
            return Ok(());
        }

        let schema = match self.schemas.get(&name) {
            Some(schema) => schema.clone(),
            None => {
                warn!(step = %name, "no schema registered for streaming step; ignoring");
                return Ok(());
            }
        };

        // Materialize the arrival and scope the pass to the affected
        // subgraph: the streaming step plus its transitive dependents.
        self.steps.mark_submitted(&name, Dataset::new(schema, rows))?;

        let mut scope = self.steps.dependent_closure(&name);
        scope.insert(name.clone());

        let mut sub = self.steps.scoped_subset(&scope);
        let result = self.scheduler.run(&mut sub).await;

        // Re-arm happens whether the pass succeeded or not. The sub-set is
        // discarded, so any loop unrolled during this micro-batch unrolls
        // again from the template on the next one.
        self.steps.reset(scope.iter());
        debug!(step = %name, "subgraph re-armed for next micro-batch");

        result
    }
}
