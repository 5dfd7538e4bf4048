// tests/property_scheduler.rs

mod common;
use crate::common::init_tracing;

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use pipedag::accum::Accumulators;
use pipedag::config::PipelineFile;
use pipedag::sched::{BatchScheduler, ExecutionPool};
use pipedag::step::StepSet;
use pipedag_test_utils::builders::{PipelineFileBuilder, StepConfigBuilder};
use pipedag_test_utils::fake_runner::RecordingRunner;

// Strategy to generate a valid acyclic pipeline configuration.
// We ensure acyclicity by only allowing step N to depend on steps 0..N-1.
fn pipeline_strategy(max_steps: usize) -> impl Strategy<Value = PipelineFile> {
    (1..=max_steps).prop_flat_map(|num_steps| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_steps),
            num_steps,
        );

        deps_strat.prop_map(move |raw_deps| {
            let mut builder = PipelineFileBuilder::new();
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                let name = format!("step_{i}");

                // Sanitize dependencies: only allow deps < i.
                let mut valid_deps = HashSet::new();
                for dep_idx in potential_deps {
                    if i > 0 {
                        valid_deps.insert(dep_idx % i);
                    }
                }

                let mut valid_deps: Vec<usize> = valid_deps.into_iter().collect();
                valid_deps.sort_unstable();

                let step = if valid_deps.is_empty() {
                    StepConfigBuilder::memory(vec![]).build()
                } else {
                    let mut step = StepConfigBuilder::deriver("union");
                    for dep_idx in valid_deps {
                        step = step.depends(&format!("step_{dep_idx}"));
                    }
                    step.build()
                };

                builder = builder.with_step(&name, step);
            }
            builder.build()
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For every acyclic step set the scheduler terminates with every step
    /// submitted exactly once, and no step starts before all of its
    /// dependencies have finished.
    #[test]
    fn scheduler_terminates_in_dependency_order(cfg in pipeline_strategy(8)) {
        init_tracing();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("building test runtime");

        let mut steps = StepSet::from_config(&cfg);
        let runner = RecordingRunner::new();
        let scheduler = BatchScheduler::new(
            Arc::new(ExecutionPool::new(4)),
            Arc::new(runner.clone()),
            Accumulators::default(),
        );

        let result = rt.block_on(async {
            tokio::time::timeout(
                std::time::Duration::from_secs(5),
                scheduler.run(&mut steps),
            )
            .await
        });

        let result = result.expect("scheduler timed out");
        prop_assert!(result.is_ok(), "scheduler failed: {:?}", result.err());
        prop_assert!(steps.all_submitted());

        let started = runner.started();
        prop_assert_eq!(started.len(), cfg.step.len(), "every step runs exactly once");

        // A dependent is dispatched in a strictly later round than each of
        // its dependencies, and every round-N start is recorded before any
        // round-N+1 start (the barrier sits between them), so start order
        // is enough to check the ordering guarantee.
        for (name, step_cfg) in cfg.step.iter() {
            let start_pos = started.iter().position(|n| n == name).unwrap();
            for dep in step_cfg.depends.iter() {
                let dep_start_pos = started.iter().position(|n| n == dep).unwrap();
                prop_assert!(
                    dep_start_pos < start_pos,
                    "{} started before its dependency {}",
                    name,
                    dep
                );
            }
        }
    }
}
