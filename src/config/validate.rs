// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{PipelineFile, RawPipelineFile, StepConfig, StepType};
use crate::errors::{PipedagError, Result};
use crate::udf;

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = crate::errors::PipedagError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(PipelineFile::new_unchecked(
            raw.application,
            raw.udfs,
            raw.step,
        ))
    }
}

fn validate_raw_config(cfg: &RawPipelineFile) -> Result<()> {
    ensure_has_steps(cfg)?;
    validate_application(cfg)?;
    validate_udfs(cfg)?;
    validate_step_shapes(cfg)?;
    validate_step_dependencies(cfg)?;
    validate_graph(cfg)?;
    Ok(())
}

fn ensure_has_steps(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.step.is_empty() {
        return Err(PipedagError::ConfigError(
            "config must contain at least one [step.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_application(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.application.pipeline_threads == 0 {
        return Err(PipedagError::ConfigError(
            "[application].pipeline_threads must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_udfs(cfg: &RawPipelineFile) -> Result<()> {
    let mut seen = HashSet::new();
    for decl in cfg.udfs.iter() {
        if !seen.insert(decl.name.as_str()) {
            return Err(PipedagError::ConfigError(format!(
                "duplicate UDF name '{}' in [[udfs]]",
                decl.name
            )));
        }
        if !udf::is_builtin(&decl.builtin) {
            return Err(PipedagError::ConfigError(format!(
                "UDF '{}' refers to unknown builtin '{}'",
                decl.name, decl.builtin
            )));
        }
    }
    Ok(())
}

/// Per-step structural checks: a step must be exactly one of
/// batch (input xor deriver), streaming (stream input only), or loop
/// (parameter + iterate + template).
fn validate_step_shapes(cfg: &RawPipelineFile) -> Result<()> {
    let aliases: HashSet<&str> = cfg.udfs.iter().map(|d| d.name.as_str()).collect();

    for (name, step) in cfg.step.iter() {
        match step.step_type {
            StepType::Loop => validate_loop_shape(cfg, name, step, &aliases)?,
            StepType::Data => validate_data_shape(name, step, &aliases)?,
        }
    }
    Ok(())
}

fn validate_data_shape(
    name: &str,
    step: &StepConfig,
    aliases: &HashSet<&str>,
) -> Result<()> {
    if step.parameter.is_some() || step.iterate.is_some() || step.template.is_some() {
        return Err(PipedagError::ConfigError(format!(
            "step '{}' declares loop fields but is not `type = \"loop\"`",
            name
        )));
    }

    match (&step.input, &step.deriver) {
        (Some(_), Some(_)) => {
            return Err(PipedagError::ConfigError(format!(
                "step '{}' declares both an input and a deriver; pick one",
                name
            )));
        }
        (None, None) => {
            return Err(PipedagError::ConfigError(format!(
                "step '{}' has neither an input nor a deriver; nothing to compute",
                name
            )));
        }
        _ => {}
    }

    if step.is_stream() {
        if !step.depends.is_empty() {
            return Err(PipedagError::ConfigError(format!(
                "streaming step '{}' must not declare `depends`; streams are sources",
                name
            )));
        }
    }

    if let Some(deriver) = &step.deriver {
        if !aliases.contains(deriver.as_str()) && !udf::is_builtin(deriver) {
            return Err(PipedagError::ConfigError(format!(
                "step '{}' uses unknown deriver '{}'",
                name, deriver
            )));
        }
    }

    Ok(())
}

fn validate_loop_shape(
    cfg: &RawPipelineFile,
    name: &str,
    step: &StepConfig,
    aliases: &HashSet<&str>,
) -> Result<()> {
    if step.input.is_some() || step.deriver.is_some() || step.output.is_some() {
        return Err(PipedagError::ConfigError(format!(
            "loop step '{}' must not declare input/deriver/output; put them on the template",
            name
        )));
    }

    if step.parameter.is_none() {
        return Err(PipedagError::ConfigError(format!(
            "loop step '{}' is missing `parameter`",
            name
        )));
    }

    let iterate = step.iterate.as_ref().ok_or_else(|| {
        PipedagError::ConfigError(format!("loop step '{}' is missing `iterate`", name))
    })?;

    match (iterate.values.is_empty(), &iterate.range) {
        (true, None) => {
            return Err(PipedagError::ConfigError(format!(
                "loop step '{}' needs `iterate.values` or `iterate.range`",
                name
            )));
        }
        (false, Some(_)) => {
            return Err(PipedagError::ConfigError(format!(
                "loop step '{}' declares both `iterate.values` and `iterate.range`; pick one",
                name
            )));
        }
        (true, Some(range)) if range.start > range.end => {
            return Err(PipedagError::ConfigError(format!(
                "loop step '{}' has an empty range ({}..={})",
                name, range.start, range.end
            )));
        }
        _ => {}
    }

    let template = step.template.as_ref().ok_or_else(|| {
        PipedagError::ConfigError(format!("loop step '{}' is missing `template`", name))
    })?;

    if template.step_type == StepType::Loop {
        return Err(PipedagError::ConfigError(format!(
            "loop step '{}' has a loop template; nested loops are not supported",
            name
        )));
    }
    if template.is_stream() {
        return Err(PipedagError::ConfigError(format!(
            "loop step '{}' has a streaming template; loops unroll into batch steps",
            name
        )));
    }
    validate_data_shape(&format!("{name}.template"), template, aliases)?;

    for dep in template.depends.iter() {
        if dep == name {
            return Err(PipedagError::ConfigError(format!(
                "loop step '{}' template depends on the loop itself",
                name
            )));
        }
        if !cfg.step.contains_key(dep) {
            return Err(PipedagError::ConfigError(format!(
                "loop step '{}' template has unknown dependency '{}'",
                name, dep
            )));
        }
    }

    Ok(())
}

fn validate_step_dependencies(cfg: &RawPipelineFile) -> Result<()> {
    for (name, step) in cfg.step.iter() {
        for dep in step.depends.iter() {
            if !cfg.step.contains_key(dep) {
                return Err(PipedagError::ConfigError(format!(
                    "step '{}' has unknown dependency '{}' in `depends`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(PipedagError::ConfigError(format!(
                    "step '{}' cannot depend on itself in `depends`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_graph(cfg: &RawPipelineFile) -> Result<()> {
    // Build a simple petgraph graph from the steps and their dependencies.
    //
    // Edge direction: dep -> step
    // For:
    //   [step.B]
    //   depends = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.step.keys() {
        graph.add_node(name.as_str());
    }

    for (name, step) in cfg.step.iter() {
        for dep in step.depends.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
        // Template dependencies are edges of the loop node itself: the
        // unrolled steps will need them, so the loop must sort after them.
        if let Some(template) = &step.template {
            for dep in template.depends.iter() {
                if cfg.step.contains_key(dep) {
                    graph.add_edge(dep.as_str(), name.as_str(), ());
                }
            }
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(PipedagError::GraphCycle(format!(
                "cycle detected in step graph involving step '{}'",
                node
            )))
        }
    }
}
