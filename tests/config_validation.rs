// tests/config_validation.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::io::Write;

use serde_json::json;

use pipedag::config::{load_and_validate, InputConfig, PipelineFile};
use pipedag::errors::PipedagError;
use pipedag_test_utils::builders::{PipelineFileBuilder, StepConfigBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> Result<tempfile::NamedTempFile, Box<dyn Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn loads_a_full_pipeline_from_toml() -> TestResult {
    init_tracing();

    let file = write_config(
        r#"
[application]
pipeline_threads = 4

[[udfs]]
name = "clean"
builtin = "filter_eq"

[step.raw.input]
kind = "memory"
rows = [{ id = 1, region = "eu" }, { id = 2, region = "us" }]

[step.eu]
depends = ["raw"]
deriver = "clean"

[step.eu.params]
field = "region"
value = "eu"

[step.report]
depends = ["eu"]
deriver = "count"
accumulators = ["rows_reported"]

[step.report.output]
kind = "stdout"
"#,
    )?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.application.pipeline_threads, 4);
    assert_eq!(cfg.udfs.len(), 1);
    assert_eq!(cfg.step.len(), 3);
    assert_eq!(cfg.step["eu"].depends, vec!["raw".to_string()]);
    assert_eq!(cfg.step["report"].accumulators, vec!["rows_reported".to_string()]);

    match cfg.step["raw"].input.as_ref().unwrap() {
        InputConfig::Memory { rows } => assert_eq!(rows.len(), 2),
        other => panic!("unexpected input kind: {other:?}"),
    }

    Ok(())
}

#[test]
fn loads_streaming_and_loop_steps_from_toml() -> TestResult {
    init_tracing();

    let file = write_config(
        r#"
[step.events.input]
kind = "stdin"
batch_interval_ms = 250

[step.events.input.translator]
kind = "delimited"
delimiter = ","
fields = ["ts", "region", "value"]

[step.per_region]
type = "loop"
parameter = "value"
depends = []

[step.per_region.iterate]
values = ["eu", "us"]

[step.per_region.template]
depends = ["events"]
deriver = "filter_eq"

[step.per_region.template.params]
field = "region"
"#,
    )?;

    let cfg = load_and_validate(file.path())?;
    assert!(cfg.step["events"].is_stream());

    let template = cfg.step["per_region"].template.as_ref().unwrap();
    assert_eq!(template.depends, vec!["events".to_string()]);

    Ok(())
}

#[test]
fn rejects_unknown_dependency() {
    init_tracing();

    let raw = PipelineFileBuilder::new()
        .with_step("A", StepConfigBuilder::deriver("passthrough").depends("missing").build())
        .build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn rejects_self_dependency() {
    init_tracing();

    let raw = PipelineFileBuilder::new()
        .with_step("A", StepConfigBuilder::deriver("passthrough").depends("A").build())
        .build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn rejects_dependency_cycles() {
    init_tracing();

    let raw = PipelineFileBuilder::new()
        .with_step("A", StepConfigBuilder::deriver("passthrough").depends("B").build())
        .with_step("B", StepConfigBuilder::deriver("passthrough").depends("A").build())
        .build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::GraphCycle(_)), "got: {err}");
}

#[test]
fn rejects_streaming_steps_with_dependencies() {
    init_tracing();

    let raw = PipelineFileBuilder::new()
        .with_step("base", StepConfigBuilder::memory(vec![]).build())
        .with_step("S", StepConfigBuilder::stream(&["v"]).depends("base").build())
        .build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn rejects_steps_with_nothing_to_compute() {
    init_tracing();

    let raw = PipelineFileBuilder::new()
        .with_step("empty", StepConfigBuilder::deriver("passthrough").build())
        .build_raw();

    // Strip the deriver to simulate a bare block.
    let mut raw = raw;
    raw.step.get_mut("empty").unwrap().deriver = None;

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn rejects_unknown_derivers() {
    init_tracing();

    let raw = PipelineFileBuilder::new()
        .with_step("A", StepConfigBuilder::deriver("no_such_udf").build())
        .build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn accepts_derivers_declared_as_udf_aliases() {
    init_tracing();

    let cfg = PipelineFileBuilder::new()
        .with_udf("normalise", "passthrough")
        .with_step("base", StepConfigBuilder::memory(vec![json!({"id": 1})]).build())
        .with_step("A", StepConfigBuilder::deriver("normalise").depends("base").build())
        .build();

    assert_eq!(cfg.step["A"].deriver.as_deref(), Some("normalise"));
}

#[test]
fn rejects_loops_without_templates() {
    init_tracing();

    let template = StepConfigBuilder::deriver("count").build();
    let mut loop_step = StepConfigBuilder::loop_over("n", vec![json!(1)], template).build();
    loop_step.template = None;

    let raw = PipelineFileBuilder::new().with_step("L", loop_step).build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn rejects_loops_with_both_values_and_range() {
    init_tracing();

    let template = StepConfigBuilder::deriver("count").build();
    let mut loop_step = StepConfigBuilder::loop_over("n", vec![json!(1)], template).build();
    if let Some(ref mut iterate) = loop_step.iterate {
        iterate.range = Some(pipedag::config::IterationRange { start: 1, end: 2 });
    }

    let raw = PipelineFileBuilder::new().with_step("L", loop_step).build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn rejects_zero_pipeline_threads() {
    init_tracing();

    let raw = PipelineFileBuilder::new()
        .with_pipeline_threads(0)
        .with_step("A", StepConfigBuilder::memory(vec![]).build())
        .build_raw();

    let err = PipelineFile::try_from(raw).unwrap_err();
    assert!(matches!(err, PipedagError::ConfigError(_)), "got: {err}");
}

#[test]
fn rejects_malformed_toml() -> TestResult {
    init_tracing();

    let file = write_config("[step.broken\n")?;
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, PipedagError::TomlError(_)), "got: {err}");

    Ok(())
}
