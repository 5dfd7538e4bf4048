// src/udf.rs

//! Named user-defined functions (derivers).
//!
//! A deriver takes the datasets of a step's dependencies plus the step's
//! `params` table and produces the step's own dataset. The registry is
//! built once before scheduling starts: builtins are always present, and
//! `[[udfs]]` entries expose a builtin under a pipeline-local name.
//!
//! Registration is eager so that a typo in a deriver name fails the
//! pipeline before any step runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::config::PipelineFile;
use crate::data::{Dataset, Schema};
use crate::errors::{PipedagError, Result};
use crate::step::StepName;

/// Everything a deriver gets to see when it runs.
pub struct UdfInput<'a> {
    /// Dependency datasets, in the step's declared `depends` order.
    pub dependencies: &'a [(StepName, Dataset)],
    /// The step's `params` table.
    pub params: &'a BTreeMap<String, JsonValue>,
}

/// A registered deriver function.
pub type UdfFn = Arc<dyn Fn(UdfInput<'_>) -> anyhow::Result<Dataset> + Send + Sync>;

const BUILTINS: &[&str] = &["passthrough", "union", "filter_eq", "count", "project"];

/// Whether `name` is one of the builtin derivers.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Registry of deriver functions keyed by name.
#[derive(Clone)]
pub struct UdfRegistry {
    map: HashMap<String, UdfFn>,
}

impl std::fmt::Debug for UdfRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.map.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("UdfRegistry").field("names", &names).finish()
    }
}

impl UdfRegistry {
    /// Registry with only the builtins.
    pub fn with_builtins() -> Self {
        let mut map: HashMap<String, UdfFn> = HashMap::new();
        map.insert("passthrough".into(), Arc::new(passthrough));
        map.insert("union".into(), Arc::new(union));
        map.insert("filter_eq".into(), Arc::new(filter_eq));
        map.insert("count".into(), Arc::new(count));
        map.insert("project".into(), Arc::new(project));
        Self { map }
    }

    /// Build the registry for a validated pipeline: builtins plus the
    /// `[[udfs]]` aliases.
    pub fn from_config(cfg: &PipelineFile) -> Result<Self> {
        let mut registry = Self::with_builtins();

        for decl in cfg.udfs.iter() {
            let target = registry.map.get(&decl.builtin).cloned().ok_or_else(|| {
                PipedagError::ConfigError(format!(
                    "UDF '{}' refers to unknown builtin '{}'",
                    decl.name, decl.builtin
                ))
            })?;
            registry.map.insert(decl.name.clone(), target);
            info!(udf = %decl.name, builtin = %decl.builtin, "registered UDF");
        }

        Ok(registry)
    }

    /// Register a deriver under a name, replacing any existing entry.
    pub fn register(&mut self, name: impl Into<String>, f: UdfFn) {
        let name = name.into();
        debug!(udf = %name, "registering deriver");
        self.map.insert(name, f);
    }

    /// Look up a deriver by name.
    pub fn get(&self, name: &str) -> Result<UdfFn> {
        self.map.get(name).cloned().ok_or_else(|| {
            PipedagError::ConfigError(format!("unknown deriver '{name}'"))
        })
    }
}

fn single_dependency<'a>(input: &'a UdfInput<'_>) -> anyhow::Result<&'a Dataset> {
    match input.dependencies {
        [(_, data)] => Ok(data),
        deps => bail!("expected exactly one dependency, got {}", deps.len()),
    }
}

fn str_param<'a>(input: &'a UdfInput<'_>, key: &str) -> anyhow::Result<&'a str> {
    input
        .params
        .get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow!("missing or non-string param '{key}'"))
}

/// Single dependency, unchanged.
fn passthrough(input: UdfInput<'_>) -> anyhow::Result<Dataset> {
    Ok(single_dependency(&input)?.clone())
}

/// Concatenate the rows of every dependency. Schema comes from the first.
fn union(input: UdfInput<'_>) -> anyhow::Result<Dataset> {
    if input.dependencies.is_empty() {
        bail!("union needs at least one dependency");
    }

    let schema = input.dependencies[0].1.schema().clone();
    let rows = input
        .dependencies
        .iter()
        .flat_map(|(_, data)| data.rows().iter().cloned())
        .collect();

    Ok(Dataset::new(schema, rows))
}

/// Keep rows whose `field` equals `value`. Both come from params, so a loop
/// binding named `value` parameterizes the comparison per iteration.
fn filter_eq(input: UdfInput<'_>) -> anyhow::Result<Dataset> {
    let data = single_dependency(&input)?;
    let field = str_param(&input, "field")?;
    let value = input
        .params
        .get("value")
        .ok_or_else(|| anyhow!("missing param 'value'"))?;

    let rows = data
        .rows()
        .iter()
        .filter(|row| row.get(field) == Some(value))
        .cloned()
        .collect();

    Ok(Dataset::new(data.schema().clone(), rows))
}

/// Single row counting all dependency rows.
fn count(input: UdfInput<'_>) -> anyhow::Result<Dataset> {
    let total: usize = input.dependencies.iter().map(|(_, d)| d.len()).sum();
    let schema = Schema::new(["count"]);
    Ok(Dataset::new(schema, vec![json!({ "count": total })]))
}

/// Keep only the fields listed in the `fields` param.
fn project(input: UdfInput<'_>) -> anyhow::Result<Dataset> {
    let data = single_dependency(&input)?;
    let fields: Vec<String> = input
        .params
        .get("fields")
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .ok_or_else(|| anyhow!("missing or non-array param 'fields'"))?;

    let rows = data
        .rows()
        .iter()
        .map(|row| {
            let mut out = serde_json::Map::new();
            for field in fields.iter() {
                if let Some(v) = row.get(field) {
                    out.insert(field.clone(), v.clone());
                }
            }
            JsonValue::Object(out)
        })
        .collect();

    Ok(Dataset::new(Schema::new(fields), rows))
}
