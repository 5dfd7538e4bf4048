// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Top-level pipeline configuration as read from a TOML file.
///
/// Direct mapping of the config format:
///
/// ```toml
/// [application]
/// pipeline_threads = 8
///
/// [[udfs]]
/// name = "clean"
/// builtin = "filter_eq"
///
/// [step.raw.input]
/// kind = "memory"
/// rows = [{ id = 1, region = "eu" }]
///
/// [step.cleaned]
/// depends = ["raw"]
/// deriver = "clean"
/// ```
///
/// All sections are optional and have reasonable defaults. This raw form is
/// unvalidated; use [`PipelineFile`] (via `TryFrom`) everywhere else.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineFile {
    /// Process-level options from `[application]`.
    #[serde(default)]
    pub application: ApplicationSection,

    /// Named user-defined functions from `[[udfs]]`.
    #[serde(default)]
    pub udfs: Vec<UdfDecl>,

    /// All steps from `[step.<name>]`.
    ///
    /// Keys are the *step names* (e.g. `"raw"`, `"cleaned"`).
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,
}

/// Validated pipeline configuration.
///
/// Construct via `PipelineFile::try_from(raw)`; see `config::validate`.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub application: ApplicationSection,
    pub udfs: Vec<UdfDecl>,
    pub step: BTreeMap<String, StepConfig>,
}

impl PipelineFile {
    /// Construct without validation. Only `config::validate` should call
    /// this; everything downstream assumes the invariants hold.
    pub fn new_unchecked(
        application: ApplicationSection,
        udfs: Vec<UdfDecl>,
        step: BTreeMap<String, StepConfig>,
    ) -> Self {
        Self {
            application,
            udfs,
            step,
        }
    }
}

/// `[application]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSection {
    /// Capacity of the execution pool that runs batch-step submissions.
    #[serde(default = "default_pipeline_threads")]
    pub pipeline_threads: usize,
}

fn default_pipeline_threads() -> usize {
    20
}

impl Default for ApplicationSection {
    fn default() -> Self {
        Self {
            pipeline_threads: default_pipeline_threads(),
        }
    }
}

/// One `[[udfs]]` entry: expose a builtin deriver under a pipeline-local name.
#[derive(Debug, Clone, Deserialize)]
pub struct UdfDecl {
    pub name: String,
    pub builtin: String,
}

/// Step kind as declared in config (`type = "data"` is the default).
///
/// Whether a data step is batch or streaming is decided by its input kind,
/// not by `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    #[default]
    Data,
    Loop,
}

/// `[step.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// `"data"` (default) or `"loop"`.
    #[serde(rename = "type", default)]
    pub step_type: StepType,

    /// Where this step reads external data from, if anywhere.
    #[serde(default)]
    pub input: Option<InputConfig>,

    /// Names of steps this one depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Named UDF applied over the dependency datasets.
    #[serde(default)]
    pub deriver: Option<String>,

    /// Free-form parameters passed to the deriver.
    #[serde(default)]
    pub params: BTreeMap<String, JsonValue>,

    /// Accumulators this step wants available while it runs.
    #[serde(default)]
    pub accumulators: Vec<String>,

    /// Where to write this step's dataset, if anywhere.
    #[serde(default)]
    pub output: Option<OutputConfig>,

    /// Loop steps only: name of the loop variable substituted per iteration.
    #[serde(default)]
    pub parameter: Option<String>,

    /// Loop steps only: the iteration source.
    #[serde(default)]
    pub iterate: Option<IterationSource>,

    /// Loop steps only: the step each iteration is stamped out from.
    #[serde(default)]
    pub template: Option<Box<StepConfig>>,
}

impl StepConfig {
    /// Whether this step reads from an unbounded stream input.
    pub fn is_stream(&self) -> bool {
        self.input.as_ref().is_some_and(InputConfig::is_stream)
    }
}

/// `[step.<name>.input]` table, discriminated by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputConfig {
    /// Inline rows embedded in the config file. Handy for reference data
    /// and tests.
    Memory {
        #[serde(default)]
        rows: Vec<JsonValue>,
    },
    /// JSON-lines file, one record per line.
    Jsonl { path: PathBuf },
    /// Unbounded stream of stdin lines, framed into micro-batches on an
    /// interval and decoded by a translator.
    Stdin {
        #[serde(default = "default_batch_interval_ms")]
        batch_interval_ms: u64,
        translator: TranslatorConfig,
    },
}

fn default_batch_interval_ms() -> u64 {
    1000
}

impl InputConfig {
    pub fn is_stream(&self) -> bool {
        matches!(self, InputConfig::Stdin { .. })
    }
}

/// `[step.<name>.input.translator]` table: how raw stream messages are
/// decoded into records.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TranslatorConfig {
    /// Separator-delimited fields mapped onto `fields` by position.
    Delimited {
        #[serde(default = "default_delimiter")]
        delimiter: String,
        fields: Vec<String>,
    },
    /// `key=value` pairs separated by `delimiter`.
    Kvp {
        #[serde(default = "default_delimiter")]
        delimiter: String,
        /// Declared field order for the schema; keys outside this list are
        /// still decoded.
        #[serde(default)]
        fields: Vec<String>,
    },
}

fn default_delimiter() -> String {
    ",".to_string()
}

/// `[step.<name>.output]` table, discriminated by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputConfig {
    /// Print each record to stdout as one JSON line.
    Stdout,
    /// Append records to a JSON-lines file.
    Jsonl { path: PathBuf },
}

/// `[step.<name>.iterate]` table for loop steps.
///
/// Exactly one of `values` / `range` must be given; `config::validate`
/// enforces this.
#[derive(Debug, Clone, Deserialize)]
pub struct IterationSource {
    /// Explicit binding values, one unrolled step per entry.
    #[serde(default)]
    pub values: Vec<JsonValue>,

    /// Inclusive integer range, one unrolled step per integer.
    #[serde(default)]
    pub range: Option<IterationRange>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IterationRange {
    pub start: i64,
    pub end: i64,
}
