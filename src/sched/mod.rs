// src/sched/mod.rs

//! Scheduling: the bounded execution pool and the round-based batch
//! scheduler that drives a step set to full submission.

pub mod pool;
pub mod scheduler;

pub use pool::{ExecutionPool, StepHandle};
pub use scheduler::BatchScheduler;
