// src/exec/mod.rs

//! Pluggable step-runner abstraction.
//!
//! The scheduler talks to a [`StepRunner`] instead of performing the
//! step's read/transform/write work itself. This keeps the scheduling core
//! independent of computation internals and makes it easy to swap in a
//! recording runner in tests.
//!
//! - [`DeriveRunner`] is the default implementation: reads batch inputs,
//!   applies derivers via the UDF registry, writes outputs.
//! - Tests can provide their own `StepRunner` that, for example, records
//!   submission order and returns canned datasets.

use std::future::Future;
use std::pin::Pin;

use crate::accum::Accumulators;
use crate::config::StepConfig;
use crate::data::Dataset;
use crate::errors::Result;
use crate::step::StepName;

pub mod runner;

pub use runner::DeriveRunner;

/// Everything one step submission needs, cloned out of the step set so the
/// worker owns its inputs outright.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: StepName,
    pub config: StepConfig,
    /// Dependency datasets in the step's declared `depends` order, scoped
    /// to the set the scheduler is driving.
    pub dependencies: Vec<(StepName, Dataset)>,
    /// Shared counter registry, distributed with every submission.
    pub accumulators: Accumulators,
}

/// Trait abstracting how a step's own computation is performed.
///
/// The returned future is `'static`: implementations clone whatever shared
/// state they need into it, since it runs on the execution pool.
pub trait StepRunner: Send + Sync + 'static {
    fn submit(
        &self,
        request: SubmitRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Dataset>> + Send + 'static>>;
}
