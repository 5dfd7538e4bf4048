// src/stream/mod.rs

//! Streaming: sources, message translators, and the coordinator that
//! re-arms dependent subgraphs on every micro-batch.

pub mod coordinator;
pub mod source;
pub mod translate;

pub use coordinator::StreamingCoordinator;
pub use source::{source_for, StdinSource, StreamEvent, StreamSource};
pub use translate::{translator_for, Translator};
