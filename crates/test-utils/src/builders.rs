#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use pipedag::config::{
    ApplicationSection, InputConfig, IterationRange, IterationSource, OutputConfig, PipelineFile,
    RawPipelineFile, StepConfig, StepType, TranslatorConfig, UdfDecl,
};

/// Builder for `PipelineFile` to simplify test setup.
pub struct PipelineFileBuilder {
    config: RawPipelineFile,
}

impl PipelineFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawPipelineFile {
                application: ApplicationSection::default(),
                udfs: Vec::new(),
                step: BTreeMap::new(),
            },
        }
    }

    pub fn with_step(mut self, name: &str, step: StepConfig) -> Self {
        self.config.step.insert(name.to_string(), step);
        self
    }

    pub fn with_pipeline_threads(mut self, threads: usize) -> Self {
        self.config.application.pipeline_threads = threads;
        self
    }

    pub fn with_udf(mut self, name: &str, builtin: &str) -> Self {
        self.config.udfs.push(UdfDecl {
            name: name.to_string(),
            builtin: builtin.to_string(),
        });
        self
    }

    pub fn build_raw(self) -> RawPipelineFile {
        self.config
    }

    pub fn build(self) -> PipelineFile {
        PipelineFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for PipelineFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StepConfig`.
pub struct StepConfigBuilder {
    step: StepConfig,
}

impl StepConfigBuilder {
    fn base() -> StepConfig {
        StepConfig {
            step_type: StepType::Data,
            input: None,
            depends: vec![],
            deriver: None,
            params: BTreeMap::new(),
            accumulators: vec![],
            output: None,
            parameter: None,
            iterate: None,
            template: None,
        }
    }

    /// Batch step reading inline rows.
    pub fn memory(rows: Vec<JsonValue>) -> Self {
        let mut step = Self::base();
        step.input = Some(InputConfig::Memory { rows });
        Self { step }
    }

    /// Batch step applying a named deriver over its dependencies.
    pub fn deriver(name: &str) -> Self {
        let mut step = Self::base();
        step.deriver = Some(name.to_string());
        Self { step }
    }

    /// Streaming step framed from stdin with a delimited translator.
    pub fn stream(fields: &[&str]) -> Self {
        let mut step = Self::base();
        step.input = Some(InputConfig::Stdin {
            batch_interval_ms: 100,
            translator: TranslatorConfig::Delimited {
                delimiter: ",".to_string(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
            },
        });
        Self { step }
    }

    /// Loop step over explicit binding values.
    pub fn loop_over(parameter: &str, values: Vec<JsonValue>, template: StepConfig) -> Self {
        let mut step = Self::base();
        step.step_type = StepType::Loop;
        step.parameter = Some(parameter.to_string());
        step.iterate = Some(IterationSource {
            values,
            range: None,
        });
        step.template = Some(Box::new(template));
        Self { step }
    }

    /// Loop step over an inclusive integer range.
    pub fn loop_range(parameter: &str, start: i64, end: i64, template: StepConfig) -> Self {
        let mut step = Self::base();
        step.step_type = StepType::Loop;
        step.parameter = Some(parameter.to_string());
        step.iterate = Some(IterationSource {
            values: vec![],
            range: Some(IterationRange { start, end }),
        });
        step.template = Some(Box::new(template));
        Self { step }
    }

    pub fn depends(mut self, dep: &str) -> Self {
        self.step.depends.push(dep.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: JsonValue) -> Self {
        self.step.params.insert(key.to_string(), value);
        self
    }

    pub fn accumulator(mut self, name: &str) -> Self {
        self.step.accumulators.push(name.to_string());
        self
    }

    pub fn output_stdout(mut self) -> Self {
        self.step.output = Some(OutputConfig::Stdout);
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}
