// src/step/model.rs

//! Step data model.
//!
//! A pipeline step is one of a closed set of kinds:
//!
//! - [`Step::Batch`]: computed once per scheduling pass.
//! - [`Step::Streaming`]: materialized by the streaming coordinator on
//!   every micro-batch; never submitted by the batch scheduler itself.
//! - [`Step::Loop`]: a template that unrolls into concrete batch steps
//!   once its own dependencies are submitted.
//!
//! The scheduler matches on the kind; there is deliberately no open-ended
//! trait for step kinds, since the set is fixed and each kind is handled
//! differently inside the scan.

use crate::config::model::StepConfig;
use crate::data::Dataset;

/// Canonical step name type used throughout the crate.
pub type StepName = String;

/// Shared body of batch and streaming steps: config plus per-pass state.
#[derive(Debug, Clone)]
pub struct DataStep {
    pub name: StepName,
    pub config: StepConfig,
    /// Whether this step's computation has been submitted in the current
    /// scheduling pass. Reset only by the streaming coordinator's re-arm.
    pub submitted: bool,
    /// The materialized dataset, present once submitted. Reset together
    /// with `submitted`, never separately.
    pub data: Option<Dataset>,
}

impl DataStep {
    pub fn new(name: StepName, config: StepConfig) -> Self {
        Self {
            name,
            config,
            submitted: false,
            data: None,
        }
    }
}

/// A loop step: holds the template and iteration source inside its config.
/// It never carries data and never counts as submitted; unrolling removes
/// it from the working set instead.
#[derive(Debug, Clone)]
pub struct LoopStep {
    pub name: StepName,
    pub config: StepConfig,
}

/// One node of the pipeline graph.
#[derive(Debug, Clone)]
pub enum Step {
    Batch(DataStep),
    Streaming(DataStep),
    Loop(LoopStep),
}

impl Step {
    /// Instantiate a step from its validated config block.
    ///
    /// `type = "loop"` makes a loop step; otherwise the input kind decides
    /// between batch and streaming.
    pub fn from_config(name: StepName, config: StepConfig) -> Self {
        use crate::config::model::StepType;

        match config.step_type {
            StepType::Loop => Step::Loop(LoopStep { name, config }),
            StepType::Data if config.is_stream() => Step::Streaming(DataStep::new(name, config)),
            StepType::Data => Step::Batch(DataStep::new(name, config)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Batch(s) | Step::Streaming(s) => &s.name,
            Step::Loop(s) => &s.name,
        }
    }

    pub fn config(&self) -> &StepConfig {
        match self {
            Step::Batch(s) | Step::Streaming(s) => &s.config,
            Step::Loop(s) => &s.config,
        }
    }

    /// Names this step's config declares as dependencies.
    pub fn depends(&self) -> &[String] {
        &self.config().depends
    }

    /// Every step name this step's config references: its own `depends`,
    /// plus (for loop steps) the template's `depends`. This is the edge
    /// set of the graph; a loop node is tied to everything its unrolled
    /// steps will need.
    pub fn references(&self) -> Vec<&str> {
        let config = self.config();
        let mut refs: Vec<&str> = config.depends.iter().map(String::as_str).collect();

        if let Some(template) = &config.template {
            for dep in template.depends.iter() {
                if !refs.contains(&dep.as_str()) {
                    refs.push(dep);
                }
            }
        }

        refs
    }

    /// Loop steps never count as submitted; they disappear by unrolling.
    pub fn has_submitted(&self) -> bool {
        match self {
            Step::Batch(s) | Step::Streaming(s) => s.submitted,
            Step::Loop(_) => false,
        }
    }

    pub fn data(&self) -> Option<&Dataset> {
        match self {
            Step::Batch(s) | Step::Streaming(s) => s.data.as_ref(),
            Step::Loop(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Step::Streaming(_))
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, Step::Loop(_))
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataStep> {
        match self {
            Step::Batch(s) | Step::Streaming(s) => Some(s),
            Step::Loop(_) => None,
        }
    }
}
