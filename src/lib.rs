// src/lib.rs

pub mod accum;
pub mod cli;
pub mod config;
pub mod data;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod sched;
pub mod step;
pub mod stream;
pub mod udf;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::accum::Accumulators;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::{InputConfig, PipelineFile, StepType};
use crate::data::Schema;
use crate::errors::{PipedagError, Result};
use crate::exec::DeriveRunner;
use crate::sched::{BatchScheduler, ExecutionPool};
use crate::step::{StepName, StepSet};
use crate::stream::{source_for, StreamEvent, StreamingCoordinator};
use crate::udf::UdfRegistry;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the step registry
/// - UDF and accumulator registration
/// - the execution pool / batch scheduler
/// - the streaming coordinator when any streaming step is present
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    // One-time pre-scheduling registrations.
    let udfs = UdfRegistry::from_config(&cfg)?;
    let steps = StepSet::from_config(&cfg);
    info!(count = steps.len(), "steps instantiated");

    let accumulators = Accumulators::from_requests(steps.accumulator_requests());

    // The pool is owned by this run and shared by reference with the
    // scheduler; nothing outlives the pipeline.
    let pool = Arc::new(ExecutionPool::new(cfg.application.pipeline_threads));
    let runner = Arc::new(DeriveRunner::new(udfs));
    let scheduler = BatchScheduler::new(Arc::clone(&pool), runner, accumulators.clone());

    if steps.has_streaming() {
        debug!("streaming step(s) identified");
        run_streaming(scheduler, steps).await?;
    } else {
        debug!("no streaming steps identified");
        let mut steps = steps;
        scheduler.run(&mut steps).await?;
    }

    report_accumulators(&accumulators);
    info!("pipeline run finished");
    Ok(())
}

/// Set up sources + shutdown handling and hand control to the streaming
/// coordinator for the remaining lifetime of the process.
async fn run_streaming<R: exec::StepRunner>(
    scheduler: BatchScheduler<R>,
    steps: StepSet,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(64);

    // One source pump per streaming step; each source pushes micro-batches
    // into the coordinator's channel.
    let mut schemas: HashMap<StepName, Schema> = HashMap::new();
    for name in steps.streaming_names() {
        let input = streaming_input(&steps, &name)?;
        let source = source_for(&name, &input)?;
        schemas.insert(name.clone(), source.schema());
        debug!(step = %name, "setting up streaming source");
        let _pump = source.spawn(name, event_tx.clone());
    }

    // Ctrl-C → graceful shutdown.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(StreamEvent::Shutdown).await;
        });
    }

    let mut coordinator = StreamingCoordinator::new(scheduler, steps, schemas, event_rx);
    coordinator.run().await
}

fn streaming_input(steps: &StepSet, name: &str) -> Result<InputConfig> {
    steps
        .get(name)
        .and_then(|step| step.config().input.clone())
        .ok_or_else(|| PipedagError::StepNotFound(name.to_string()))
}

fn report_accumulators(accumulators: &Accumulators) {
    if accumulators.is_empty() {
        return;
    }
    for (name, value) in accumulators.snapshot() {
        info!(accumulator = %name, value, "final accumulator value");
    }
}

/// Simple dry-run output: print steps, kinds, dependencies and derivers.
fn print_dry_run(cfg: &PipelineFile) {
    println!("pipedag dry-run");
    println!(
        "  application.pipeline_threads = {}",
        cfg.application.pipeline_threads
    );
    println!();

    if !cfg.udfs.is_empty() {
        println!("udfs ({}):", cfg.udfs.len());
        for decl in cfg.udfs.iter() {
            println!("  - {} -> builtin {}", decl.name, decl.builtin);
        }
        println!();
    }

    println!("steps ({}):", cfg.step.len());
    for (name, step) in cfg.step.iter() {
        println!("  - {name}");
        match step.step_type {
            StepType::Loop => {
                if let Some(ref parameter) = step.parameter {
                    println!("      loop over: {parameter}");
                }
            }
            StepType::Data => {
                if let Some(ref input) = step.input {
                    let kind = match input {
                        InputConfig::Memory { .. } => "memory",
                        InputConfig::Jsonl { .. } => "jsonl",
                        InputConfig::Stdin { .. } => "stdin (streaming)",
                    };
                    println!("      input: {kind}");
                }
                if let Some(ref deriver) = step.deriver {
                    println!("      deriver: {deriver}");
                }
            }
        }
        if !step.depends.is_empty() {
            println!("      depends: {:?}", step.depends);
        }
        if !step.accumulators.is_empty() {
            println!("      accumulators: {:?}", step.accumulators);
        }
    }

    debug!("dry-run complete (no execution)");
}
