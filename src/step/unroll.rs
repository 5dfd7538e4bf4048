// src/step/unroll.rs

//! Loop unrolling: replace a loop step with one concrete batch step per
//! binding of its iteration source.
//!
//! Unrolling is a pure `StepSet -> StepSet` function applied by the
//! scheduler strictly between rounds, never during a scan. Given the same
//! config and iteration source it always produces the same names and
//! configs, so a retried unroll is idempotent.

use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::config::model::IterationSource;
use crate::errors::{PipedagError, Result};
use crate::step::model::{DataStep, Step};
use crate::step::set::StepSet;

/// Unroll `loop_name` within `steps`.
///
/// Requires the loop step to be present with all of its dependencies
/// submitted (the scheduler checks readiness before calling). Steps
/// unrelated to the loop are carried over with their current
/// `submitted`/`data` state; the loop step itself is removed and never
/// re-added.
pub fn unroll(loop_name: &str, steps: &StepSet) -> Result<StepSet> {
    let Some(Step::Loop(loop_step)) = steps.get(loop_name) else {
        return Err(PipedagError::StepNotFound(loop_name.to_string()));
    };

    let config = &loop_step.config;
    let parameter = config.parameter.as_ref().ok_or_else(|| {
        PipedagError::ConfigError(format!("loop step '{loop_name}' has no `parameter`"))
    })?;
    let iterate = config.iterate.as_ref().ok_or_else(|| {
        PipedagError::ConfigError(format!("loop step '{loop_name}' has no `iterate`"))
    })?;
    let template = config.template.as_ref().ok_or_else(|| {
        PipedagError::ConfigError(format!("loop step '{loop_name}' has no `template`"))
    })?;

    let mut unrolled = steps.clone();
    unrolled.remove(loop_name);

    for (discriminator, value) in bindings(iterate) {
        let name = format!("{loop_name}_{discriminator}");
        if unrolled.contains(&name) {
            return Err(PipedagError::ConfigError(format!(
                "unrolled step '{name}' collides with an existing step"
            )));
        }

        let mut step_config = (**template).clone();
        step_config.params.insert(parameter.clone(), value);

        debug!(step = %name, loop_step = %loop_name, "unrolled loop iteration");
        unrolled.insert(Step::Batch(DataStep::new(name, step_config)));
    }

    Ok(unrolled)
}

/// Expand the iteration source into (discriminator, binding value) pairs,
/// in source order.
fn bindings(iterate: &IterationSource) -> Vec<(String, JsonValue)> {
    if let Some(range) = iterate.range {
        return (range.start..=range.end)
            .map(|i| (i.to_string(), json!(i)))
            .collect();
    }

    iterate
        .values
        .iter()
        .map(|value| (discriminator_for(value), value.clone()))
        .collect()
}

/// Name suffix for one binding: the bare string for string bindings, the
/// JSON rendering otherwise.
fn discriminator_for(value: &JsonValue) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
