// src/exec/runner.rs

//! Default step runner: inputs, derivers, outputs.

use std::future::Future;
use std::pin::Pin;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::{InputConfig, OutputConfig};
use crate::data::{Dataset, Record};
use crate::errors::PipedagError;
use crate::exec::{StepRunner, SubmitRequest};
use crate::udf::{UdfInput, UdfRegistry};

/// Production step runner.
///
/// Performs one step's actual work when its submission runs on the pool:
///
/// - input steps materialize their configured source (`memory`, `jsonl`),
/// - deriver steps apply the named UDF over the dependency datasets,
/// - each requested accumulator is bumped by the number of rows produced,
/// - an optional output writes the dataset out (`stdout`, `jsonl`).
pub struct DeriveRunner {
    udfs: UdfRegistry,
}

impl DeriveRunner {
    pub fn new(udfs: UdfRegistry) -> Self {
        Self { udfs }
    }
}

impl StepRunner for DeriveRunner {
    fn submit(
        &self,
        request: SubmitRequest,
    ) -> Pin<Box<dyn Future<Output = crate::errors::Result<Dataset>> + Send + 'static>> {
        let udfs = self.udfs.clone();

        Box::pin(async move {
            let step = request.name.clone();
            run_step(udfs, request)
                .await
                .map_err(|source| PipedagError::StepFailed { step, source })
        })
    }
}

async fn run_step(udfs: UdfRegistry, request: SubmitRequest) -> Result<Dataset> {
    info!(
        step = %request.name,
        dependencies = request.dependencies.len(),
        "starting step submission"
    );

    let data = match (&request.config.input, &request.config.deriver) {
        (Some(input), _) => read_input(&request.name, input).await?,
        (None, Some(deriver)) => {
            let f = udfs.get(deriver)?;
            f(UdfInput {
                dependencies: &request.dependencies,
                params: &request.config.params,
            })
            .with_context(|| format!("applying deriver '{deriver}'"))?
        }
        (None, None) => bail!("step has neither an input nor a deriver"),
    };

    for accumulator in request.config.accumulators.iter() {
        request.accumulators.bump(accumulator, data.len() as u64);
    }

    if let Some(output) = &request.config.output {
        write_output(&request.name, output, &data).await?;
    }

    info!(step = %request.name, rows = data.len(), "step submission produced dataset");
    Ok(data)
}

async fn read_input(step: &str, input: &InputConfig) -> Result<Dataset> {
    match input {
        InputConfig::Memory { rows } => {
            debug!(step = %step, rows = rows.len(), "materializing inline rows");
            Ok(Dataset::from_rows(rows.clone()))
        }
        InputConfig::Jsonl { path } => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading input file '{}'", path.display()))?;

            let rows = contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    serde_json::from_str::<Record>(line)
                        .with_context(|| format!("parsing JSON line in '{}'", path.display()))
                })
                .collect::<Result<Vec<_>>>()?;

            debug!(step = %step, rows = rows.len(), path = %path.display(), "read input file");
            Ok(Dataset::from_rows(rows))
        }
        InputConfig::Stdin { .. } => {
            // Stream inputs are materialized per micro-batch by the
            // streaming coordinator, never through a batch submission.
            bail!("stream input reached the batch runner")
        }
    }
}

async fn write_output(step: &str, output: &OutputConfig, data: &Dataset) -> Result<()> {
    match output {
        OutputConfig::Stdout => {
            let mut stdout = tokio::io::stdout();
            for row in data.rows() {
                let line = serde_json::to_string(row).context("encoding output row")?;
                stdout
                    .write_all(format!("{line}\n").as_bytes())
                    .await
                    .context("writing output row to stdout")?;
            }
            stdout.flush().await.context("flushing stdout")?;
        }
        OutputConfig::Jsonl { path } => {
            let mut lines = String::new();
            for row in data.rows() {
                lines.push_str(&serde_json::to_string(row).context("encoding output row")?);
                lines.push('\n');
            }

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("opening output file '{}'", path.display()))?;
            file.write_all(lines.as_bytes())
                .await
                .with_context(|| format!("writing output file '{}'", path.display()))?;
        }
    }

    debug!(step = %step, rows = data.len(), "wrote step output");
    Ok(())
}
