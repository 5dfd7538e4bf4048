// src/stream/source.rs

//! Stream sources: push-based producers of micro-batches.
//!
//! A source owns the external delivery mechanism. The coordinator never
//! polls; each source spawns a pump task that sends
//! [`StreamEvent::MicroBatch`]es into the coordinator's channel for the
//! lifetime of the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::InputConfig;
use crate::data::{Record, Schema};
use crate::errors::{PipedagError, Result};
use crate::step::StepName;
use crate::stream::translate::{translator_for, Translator};

/// Events flowing into the streaming coordinator from sources and the
/// shutdown handler.
#[derive(Debug)]
pub enum StreamEvent {
    /// One externally delivered unit of streaming data for a step.
    MicroBatch { step: StepName, rows: Vec<Record> },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    Shutdown,
}

/// Trait abstracting the external streaming engine behind one step.
pub trait StreamSource: Send + 'static {
    /// Schema of the records this source delivers.
    fn schema(&self) -> Schema;

    /// Start the pump: read the external stream and push micro-batches for
    /// `step` into `tx` until the stream ends or the channel closes.
    fn spawn(self: Box<Self>, step: StepName, tx: mpsc::Sender<StreamEvent>) -> JoinHandle<()>;
}

/// Build the source for a streaming step's input config.
pub fn source_for(step: &str, input: &InputConfig) -> Result<Box<dyn StreamSource>> {
    match input {
        InputConfig::Stdin {
            batch_interval_ms,
            translator,
        } => Ok(Box::new(StdinSource {
            batch_interval: Duration::from_millis((*batch_interval_ms).max(1)),
            translator: translator_for(translator).into(),
        })),
        _ => Err(PipedagError::ConfigError(format!(
            "step '{step}' does not have a stream input"
        ))),
    }
}

/// Reads stdin lines and frames them into micro-batches on a fixed
/// interval, decoding each line with the configured translator.
pub struct StdinSource {
    batch_interval: Duration,
    translator: Arc<dyn Translator>,
}

impl StreamSource for StdinSource {
    fn schema(&self) -> Schema {
        self.translator.schema()
    }

    fn spawn(self: Box<Self>, step: StepName, tx: mpsc::Sender<StreamEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(step = %step, interval = ?self.batch_interval, "stdin source started");

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut interval = tokio::time::interval(self.batch_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut buffer: Vec<Record> = Vec::new();

            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => match self.translator.translate(&line) {
                            Ok(record) => buffer.push(record),
                            Err(e) => {
                                warn!(step = %step, error = %e, "skipping untranslatable message");
                            }
                        },
                        Ok(None) => {
                            debug!(step = %step, "stdin reached EOF");
                            break;
                        }
                        Err(e) => {
                            warn!(step = %step, error = %e, "stdin read error; stopping source");
                            break;
                        }
                    },
                    _ = interval.tick() => {
                        if !flush(&step, &mut buffer, &tx).await {
                            return;
                        }
                    }
                }
            }

            // Deliver whatever arrived since the last tick before stopping.
            flush(&step, &mut buffer, &tx).await;
            info!(step = %step, "stdin source finished");
        })
    }
}

/// Send the buffered rows as one micro-batch. Returns `false` when the
/// coordinator side has gone away.
async fn flush(step: &str, buffer: &mut Vec<Record>, tx: &mpsc::Sender<StreamEvent>) -> bool {
    if buffer.is_empty() {
        return true;
    }

    let rows = std::mem::take(buffer);
    debug!(step = %step, rows = rows.len(), "delivering micro-batch");

    tx.send(StreamEvent::MicroBatch {
        step: step.to_string(),
        rows,
    })
    .await
    .is_ok()
}
