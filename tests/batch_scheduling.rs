// tests/batch_scheduling.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pipedag::accum::Accumulators;
use pipedag::sched::{BatchScheduler, ExecutionPool};
use pipedag::step::StepSet;
use pipedag_test_utils::builders::{PipelineFileBuilder, StepConfigBuilder};
use pipedag_test_utils::fake_runner::RecordingRunner;

type TestResult = Result<(), Box<dyn Error>>;

fn scheduler_for(runner: &RecordingRunner, capacity: usize) -> BatchScheduler<RecordingRunner> {
    BatchScheduler::new(
        Arc::new(ExecutionPool::new(capacity)),
        Arc::new(runner.clone()),
        Accumulators::default(),
    )
}

/// Scenario A: B and C both depend on A. A must run alone first; B and C
/// follow in the next round, in either order.
#[tokio::test]
async fn fan_out_runs_root_first_then_dependents() -> TestResult {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_step("A", StepConfigBuilder::memory(vec![json!({"id": 1})]).build())
        .with_step("B", StepConfigBuilder::deriver("passthrough").depends("A").build())
        .with_step("C", StepConfigBuilder::deriver("passthrough").depends("A").build())
        .build();
    let mut steps = StepSet::from_config(&cfg);

    let runner = RecordingRunner::new();
    let scheduler = scheduler_for(&runner, 4);

    with_timeout(scheduler.run(&mut steps)).await?;

    assert!(steps.all_submitted());

    let started = runner.started();
    assert_eq!(started.len(), 3);
    assert_eq!(started[0], "A");

    // A's submission finished before either dependent started.
    let finished = runner.finished();
    assert_eq!(finished[0], "A");

    let mut dependents = started[1..].to_vec();
    dependents.sort();
    assert_eq!(dependents, vec!["B".to_string(), "C".to_string()]);

    Ok(())
}

#[tokio::test]
async fn chain_runs_in_dependency_order() -> TestResult {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_step("A", StepConfigBuilder::memory(vec![]).build())
        .with_step("B", StepConfigBuilder::deriver("passthrough").depends("A").build())
        .with_step("C", StepConfigBuilder::deriver("passthrough").depends("B").build())
        .build();
    let mut steps = StepSet::from_config(&cfg);

    let runner = RecordingRunner::new();
    let scheduler = scheduler_for(&runner, 4);

    with_timeout(scheduler.run(&mut steps)).await?;

    assert_eq!(
        runner.started(),
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    );
    assert!(steps.all_submitted());

    Ok(())
}

/// Steps with no dependency relation have no ordering guarantee, but all
/// of them must run exactly once.
#[tokio::test]
async fn independent_steps_all_run_once() -> TestResult {
    init_tracing();

    let mut builder = PipelineFileBuilder::new();
    for name in ["one", "two", "three"] {
        builder = builder.with_step(name, StepConfigBuilder::memory(vec![]).build());
    }
    let mut steps = StepSet::from_config(&builder.build());

    let runner = RecordingRunner::new();
    let scheduler = scheduler_for(&runner, 4);

    with_timeout(scheduler.run(&mut steps)).await?;

    for name in ["one", "two", "three"] {
        assert_eq!(runner.run_count(name), 1, "step {name} should run once");
    }

    Ok(())
}

/// The pool bounds concurrency: with capacity 2, four independent slow
/// steps never run more than two at a time.
#[tokio::test]
async fn pool_capacity_bounds_concurrent_submissions() -> TestResult {
    init_tracing();

    let mut builder = PipelineFileBuilder::new().with_pipeline_threads(2);
    for name in ["w", "x", "y", "z"] {
        builder = builder.with_step(name, StepConfigBuilder::memory(vec![]).build());
    }
    let mut steps = StepSet::from_config(&builder.build());

    let runner = RecordingRunner::new();
    runner.set_delay(Duration::from_millis(50));
    let scheduler = scheduler_for(&runner, 2);

    with_timeout(scheduler.run(&mut steps)).await?;

    assert_eq!(runner.started().len(), 4);
    assert!(
        runner.max_active() <= 2,
        "observed {} concurrent submissions with capacity 2",
        runner.max_active()
    );

    Ok(())
}

/// Dependents see the dependency's dataset, not an empty placeholder.
#[tokio::test]
async fn dependents_receive_dependency_data() -> TestResult {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_step("A", StepConfigBuilder::memory(vec![]).build())
        .with_step("B", StepConfigBuilder::deriver("passthrough").depends("A").build())
        .build();
    let mut steps = StepSet::from_config(&cfg);

    let runner = RecordingRunner::new();
    let scheduler = scheduler_for(&runner, 4);

    with_timeout(scheduler.run(&mut steps)).await?;

    let record = runner
        .records()
        .into_iter()
        .find(|r| r.name == "B")
        .expect("B submitted");
    assert_eq!(record.dependencies.len(), 1);
    assert_eq!(record.dependencies[0].0, "A");
    assert_eq!(record.dependencies[0].1, vec![json!({"step": "A"})]);

    Ok(())
}
