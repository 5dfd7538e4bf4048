// src/errors.rs

//! Crate-wide error type and helpers.

use thiserror::Error;

use crate::step::StepName;

#[derive(Error, Debug)]
pub enum PipedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Cycle detected in step graph: {0}")]
    GraphCycle(String),

    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: StepName,
        #[source]
        source: anyhow::Error,
    },

    #[error("Scheduling stalled: {0}")]
    SchedulingStall(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipedagError>;
