// tests/streaming_rearm.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use pipedag::accum::Accumulators;
use pipedag::data::Schema;
use pipedag::errors::PipedagError;
use pipedag::sched::{BatchScheduler, ExecutionPool};
use pipedag::step::{StepName, StepSet};
use pipedag::stream::{StreamEvent, StreamingCoordinator};
use pipedag_test_utils::builders::{PipelineFileBuilder, StepConfigBuilder};
use pipedag_test_utils::fake_runner::RecordingRunner;

type TestResult = Result<(), Box<dyn Error>>;

fn scheduler_for(runner: &RecordingRunner) -> BatchScheduler<RecordingRunner> {
    BatchScheduler::new(
        Arc::new(ExecutionPool::new(4)),
        Arc::new(runner.clone()),
        Accumulators::default(),
    )
}

fn stream_schemas(names: &[&str], fields: &[&str]) -> HashMap<StepName, Schema> {
    names
        .iter()
        .map(|name| (name.to_string(), Schema::new(fields.iter().copied())))
        .collect()
}

async fn send_batch(
    tx: &mpsc::Sender<StreamEvent>,
    step: &str,
    rows: Vec<serde_json::Value>,
) -> TestResult {
    tx.send(StreamEvent::MicroBatch {
        step: step.to_string(),
        rows,
    })
    .await?;
    Ok(())
}

/// Scenario C: streaming step S feeds batch step D. Each micro-batch
/// submits S, runs D against that batch's data, then resets both to idle.
#[tokio::test]
async fn micro_batches_rearm_the_dependent_subgraph() -> TestResult {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_step("S", StepConfigBuilder::stream(&["region", "value"]).build())
        .with_step("D", StepConfigBuilder::deriver("passthrough").depends("S").build())
        .build();
    let steps = StepSet::from_config(&cfg);

    let runner = RecordingRunner::new();
    let scheduler = scheduler_for(&runner);

    let (tx, rx) = mpsc::channel::<StreamEvent>(16);
    let mut coordinator =
        StreamingCoordinator::new(scheduler, steps, stream_schemas(&["S"], &["region", "value"]), rx);

    let first = json!({"region": "eu", "value": 1});
    let second = json!({"region": "us", "value": 2});
    send_batch(&tx, "S", vec![first.clone()]).await?;
    send_batch(&tx, "S", vec![second.clone()]).await?;
    tx.send(StreamEvent::Shutdown).await?;

    with_timeout(coordinator.run()).await?;

    // D ran once per micro-batch, each time against that batch's rows,
    // never against stale data from the previous cycle.
    let d_records: Vec<_> = runner
        .records()
        .into_iter()
        .filter(|r| r.name == "D")
        .collect();
    assert_eq!(d_records.len(), 2);
    assert_eq!(d_records[0].dependencies[0].1, vec![first]);
    assert_eq!(d_records[1].dependencies[0].1, vec![second]);

    // Re-arm left the whole subgraph idle, however many batches ran.
    let steps = coordinator.steps();
    for name in ["S", "D"] {
        let step = steps.get(name).unwrap();
        assert!(!step.has_submitted(), "{name} should be idle after re-arm");
        assert!(step.data().is_none(), "{name} should hold no data after re-arm");
    }

    Ok(())
}

/// The independent non-streaming prefix runs exactly once and its data is
/// visible to every micro-batch's subgraph; it is never re-armed.
#[tokio::test]
async fn independent_prefix_runs_once_and_feeds_every_batch() -> TestResult {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_step("lookup", StepConfigBuilder::memory(vec![json!({"k": 1})]).build())
        .with_step("S", StepConfigBuilder::stream(&["v"]).build())
        .with_step(
            "join",
            StepConfigBuilder::deriver("union").depends("S").depends("lookup").build(),
        )
        .build();
    let steps = StepSet::from_config(&cfg);

    let runner = RecordingRunner::new();
    let scheduler = scheduler_for(&runner);

    let (tx, rx) = mpsc::channel::<StreamEvent>(16);
    let mut coordinator =
        StreamingCoordinator::new(scheduler, steps, stream_schemas(&["S"], &["v"]), rx);

    send_batch(&tx, "S", vec![json!({"v": 1})]).await?;
    send_batch(&tx, "S", vec![json!({"v": 2})]).await?;
    tx.send(StreamEvent::Shutdown).await?;

    with_timeout(coordinator.run()).await?;

    assert_eq!(runner.run_count("lookup"), 1, "prefix must run exactly once");
    assert_eq!(runner.run_count("join"), 2);

    // Both join submissions saw the lookup dataset alongside the stream.
    for record in runner.records().into_iter().filter(|r| r.name == "join") {
        let deps: Vec<&str> = record.dependencies.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(deps, vec!["S", "lookup"]);
        assert_eq!(record.dependencies[1].1, vec![json!({"step": "lookup"})]);
    }

    // The prefix stays submitted; only the dependent subgraph re-arms.
    let steps = coordinator.steps();
    assert!(steps.get("lookup").unwrap().has_submitted());
    assert!(!steps.get("join").unwrap().has_submitted());

    Ok(())
}

/// A failure inside one micro-batch's subgraph still re-arms the subgraph
/// before the error propagates out of the coordinator.
#[tokio::test]
async fn subgraph_failure_rearms_then_propagates() -> TestResult {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_step("S", StepConfigBuilder::stream(&["v"]).build())
        .with_step("D", StepConfigBuilder::deriver("passthrough").depends("S").build())
        .build();
    let steps = StepSet::from_config(&cfg);

    let runner = RecordingRunner::new();
    runner.fail_step("D");
    let scheduler = scheduler_for(&runner);

    let (tx, rx) = mpsc::channel::<StreamEvent>(16);
    let mut coordinator =
        StreamingCoordinator::new(scheduler, steps, stream_schemas(&["S"], &["v"]), rx);

    send_batch(&tx, "S", vec![json!({"v": 1})]).await?;

    let result = with_timeout(coordinator.run()).await;
    assert!(matches!(
        result,
        Err(PipedagError::StepFailed { ref step, .. }) if step == "D"
    ));

    let steps = coordinator.steps();
    for name in ["S", "D"] {
        assert!(!steps.get(name).unwrap().has_submitted());
    }

    Ok(())
}

/// Micro-batches for unknown steps are ignored rather than fatal.
#[tokio::test]
async fn unknown_micro_batches_are_ignored() -> TestResult {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_step("S", StepConfigBuilder::stream(&["v"]).build())
        .with_step("D", StepConfigBuilder::deriver("passthrough").depends("S").build())
        .build();
    let steps = StepSet::from_config(&cfg);

    let runner = RecordingRunner::new();
    let scheduler = scheduler_for(&runner);

    let (tx, rx) = mpsc::channel::<StreamEvent>(16);
    let mut coordinator =
        StreamingCoordinator::new(scheduler, steps, stream_schemas(&["S"], &["v"]), rx);

    send_batch(&tx, "nope", vec![json!({"v": 1})]).await?;
    send_batch(&tx, "S", vec![json!({"v": 2})]).await?;
    tx.send(StreamEvent::Shutdown).await?;

    with_timeout(coordinator.run()).await?;

    assert_eq!(runner.run_count("D"), 1);

    Ok(())
}
