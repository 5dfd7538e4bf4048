// src/step/mod.rs

//! Step model and the working step set.
//!
//! - [`model`] defines the closed set of step kinds and per-step state.
//! - [`set`] holds the mutable working collection plus the dependency
//!   resolver operations over it.
//! - [`unroll`] expands loop steps into concrete batch steps.

pub mod model;
pub mod set;
pub mod unroll;

pub use model::{DataStep, LoopStep, Step, StepName};
pub use set::StepSet;
pub use unroll::unroll;
