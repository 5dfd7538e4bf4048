// src/step/set.rs

//! The mutable working collection of steps for one scheduling invocation,
//! plus the dependency-resolver operations over it.
//!
//! Keyed by step name in a `BTreeMap` so scans and unrolls are
//! deterministic. The set is exclusively owned by the invocation driving
//! it; structural mutation (loop-unroll replacement) happens strictly
//! between scheduling rounds.

use std::collections::BTreeSet;
use std::collections::btree_map::{self, BTreeMap};

use tracing::{debug, warn};

use crate::config::PipelineFile;
use crate::data::Dataset;
use crate::errors::{PipedagError, Result};
use crate::step::model::{Step, StepName};

#[derive(Debug, Clone, Default)]
pub struct StepSet {
    steps: BTreeMap<StepName, Step>,
}

impl StepSet {
    /// Instantiate the step set from a validated pipeline config.
    ///
    /// This is the step registry: it types each config block but builds no
    /// graph; edges are discovered on demand by [`StepSet::dependencies_of`].
    pub fn from_config(cfg: &PipelineFile) -> Self {
        let steps = cfg
            .step
            .iter()
            .map(|(name, step_cfg)| {
                let step = Step::from_config(name.clone(), step_cfg.clone());
                (name.clone(), step)
            })
            .collect();
        Self { steps }
    }

    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps
                .into_iter()
                .map(|s| (s.name().to_string(), s))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.get_mut(name)
    }

    pub fn insert(&mut self, step: Step) {
        self.steps.insert(step.name().to_string(), step);
    }

    pub fn remove(&mut self, name: &str) -> Option<Step> {
        self.steps.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> btree_map::Values<'_, StepName, Step> {
        self.steps.values()
    }

    /// Step names joined for log lines.
    pub fn names_joined(&self) -> String {
        self.names().collect::<Vec<_>>().join(", ")
    }

    /// Names of the steps `name` depends on, scoped to this set.
    ///
    /// References to names absent from the set are excluded; that is what
    /// lets a sub-set scheduling pass resolve against the subgraph only.
    /// Loop steps depend on their template's dependencies as well, so an
    /// unroll only happens once everything the unrolled steps need exists.
    pub fn dependencies_of(&self, name: &str) -> Vec<StepName> {
        let Some(step) = self.steps.get(name) else {
            return Vec::new();
        };

        step.references()
            .into_iter()
            .filter(|dep| self.steps.contains_key(*dep))
            .map(str::to_string)
            .collect()
    }

    /// Direct dependents of `name` within this set.
    pub fn dependents_of(&self, name: &str) -> Vec<StepName> {
        self.steps
            .values()
            .filter(|step| step.references().contains(&name))
            .map(|step| step.name().to_string())
            .collect()
    }

    /// Transitive closure of dependents of `name`, excluding `name` itself.
    ///
    /// Used to scope a streaming re-arm to exactly the subgraph affected by
    /// one streaming step's new data.
    pub fn dependent_closure(&self, name: &str) -> BTreeSet<StepName> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<StepName> = self.dependents_of(name);

        while let Some(current) = stack.pop() {
            if !closure.insert(current.clone()) {
                continue;
            }
            stack.extend(self.dependents_of(&current));
        }

        closure
    }

    /// True iff every step in the set is submitted. Loop steps never count
    /// as submitted, so a set still holding one is never done.
    pub fn all_submitted(&self) -> bool {
        self.steps.values().all(Step::has_submitted)
    }

    /// Whether every dependency of `name` (within this set) is submitted.
    /// A step with no dependencies is immediately ready.
    pub fn deps_submitted(&self, name: &str) -> bool {
        self.dependencies_of(name)
            .iter()
            .all(|dep| self.steps.get(dep).is_some_and(Step::has_submitted))
    }

    pub fn has_streaming(&self) -> bool {
        self.steps.values().any(Step::is_streaming)
    }

    pub fn streaming_names(&self) -> Vec<StepName> {
        self.steps
            .values()
            .filter(|s| s.is_streaming())
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Names of non-streaming steps with no direct or transitive dependency
    /// on any streaming step. These can run once up front and serve as
    /// static lookup data for every future micro-batch.
    pub fn independent_non_streaming(&self) -> BTreeSet<StepName> {
        let mut tainted = BTreeSet::new();
        for step in self.steps.values().filter(|s| s.is_streaming()) {
            tainted.insert(step.name().to_string());
            tainted.extend(self.dependent_closure(step.name()));
        }

        self.names()
            .filter(|name| !tainted.contains(*name))
            .map(str::to_string)
            .collect()
    }

    /// Clone a sub-set for a scoped scheduling pass.
    ///
    /// Includes every step in `scope`, plus any already-submitted direct
    /// dependency of a scope member so its dataset is available as an
    /// input. Unsubmitted out-of-scope dependencies are left out entirely;
    /// scoped dependency resolution then ignores them.
    pub fn scoped_subset(&self, scope: &BTreeSet<StepName>) -> StepSet {
        let mut steps = BTreeMap::new();

        for name in scope {
            match self.steps.get(name) {
                Some(step) => {
                    steps.insert(name.clone(), step.clone());
                }
                None => {
                    warn!(step = %name, "scoped name not present in step set");
                    continue;
                }
            }

            for dep in self.steps[name].references() {
                if scope.contains(dep) || steps.contains_key(dep) {
                    continue;
                }
                if let Some(dep_step) = self.steps.get(dep) {
                    if dep_step.has_submitted() {
                        steps.insert(dep.to_string(), dep_step.clone());
                    }
                }
            }
        }

        StepSet { steps }
    }

    /// Fold a finished sub-set pass back into this set.
    ///
    /// Every original `scope` name is removed and every step of `result`
    /// is inserted, so unroll replacements performed inside the sub-set
    /// (loop gone, concrete steps added) become permanent here.
    pub fn absorb(&mut self, scope: &BTreeSet<StepName>, result: StepSet) {
        for name in scope {
            self.steps.remove(name);
        }
        for (name, step) in result.steps {
            self.steps.insert(name, step);
        }
    }

    /// Re-arm: set `submitted = false` and drop `data` for each named step.
    /// The two always reset together so a dependent can never observe stale
    /// data behind a fresh submitted flag.
    pub fn reset(&mut self, names: impl IntoIterator<Item = impl AsRef<str>>) {
        for name in names {
            let name = name.as_ref();
            match self.steps.get_mut(name).and_then(Step::as_data_mut) {
                Some(data_step) => {
                    data_step.submitted = false;
                    data_step.data = None;
                    debug!(step = %name, "reset step to idle");
                }
                None => {
                    debug!(step = %name, "reset skipped; not a data step in this set");
                }
            }
        }
    }

    /// Record a completed submission: store the dataset and mark submitted.
    pub fn mark_submitted(&mut self, name: &str, data: Dataset) -> Result<()> {
        let step = self
            .steps
            .get_mut(name)
            .ok_or_else(|| PipedagError::StepNotFound(name.to_string()))?;

        let data_step = step.as_data_mut().ok_or_else(|| {
            PipedagError::ConfigError(format!("step '{name}' cannot carry data"))
        })?;

        data_step.data = Some(data);
        data_step.submitted = true;
        Ok(())
    }

    /// Union of every step's declared accumulator requests, template
    /// requests included so unrolled steps find their counters registered.
    pub fn accumulator_requests(&self) -> BTreeSet<String> {
        let mut requests = BTreeSet::new();
        for step in self.steps.values() {
            requests.extend(step.config().accumulators.iter().cloned());
            if let Some(template) = &step.config().template {
                requests.extend(template.accumulators.iter().cloned());
            }
        }
        requests
    }
}
