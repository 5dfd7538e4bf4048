// src/stream/translate.rs

//! Message translators: decode one raw stream message into a record.
//!
//! Stream sources deliver opaque text; the configured translator turns
//! each message into a typed record and declares the schema of what it
//! produces. Selected by name from `[step.<name>.input.translator]`.

use anyhow::{bail, Result};
use serde_json::{Map, Value as JsonValue};

use crate::config::TranslatorConfig;
use crate::data::{Record, Schema};

pub trait Translator: Send + Sync {
    /// Schema of the records this translator generates.
    fn schema(&self) -> Schema;

    /// Decode one arriving message.
    fn translate(&self, message: &str) -> Result<Record>;
}

/// Build the translator for a stream input's config block.
pub fn translator_for(config: &TranslatorConfig) -> Box<dyn Translator> {
    match config {
        TranslatorConfig::Delimited { delimiter, fields } => Box::new(DelimitedTranslator {
            delimiter: delimiter.clone(),
            fields: fields.clone(),
        }),
        TranslatorConfig::Kvp { delimiter, fields } => Box::new(KvpTranslator {
            delimiter: delimiter.clone(),
            fields: fields.clone(),
        }),
    }
}

/// Separator-delimited values mapped onto declared field names by position.
pub struct DelimitedTranslator {
    delimiter: String,
    fields: Vec<String>,
}

impl Translator for DelimitedTranslator {
    fn schema(&self) -> Schema {
        Schema::new(self.fields.iter().cloned())
    }

    fn translate(&self, message: &str) -> Result<Record> {
        let values: Vec<&str> = message.split(self.delimiter.as_str()).collect();
        if values.len() != self.fields.len() {
            bail!(
                "expected {} delimited fields, got {}",
                self.fields.len(),
                values.len()
            );
        }

        let mut record = Map::new();
        for (field, value) in self.fields.iter().zip(values) {
            record.insert(field.clone(), parse_scalar(value));
        }

        Ok(JsonValue::Object(record))
    }
}

/// `key=value` pairs separated by a delimiter. Keys outside the declared
/// field list are still decoded; the declared list only fixes the schema.
pub struct KvpTranslator {
    delimiter: String,
    fields: Vec<String>,
}

impl Translator for KvpTranslator {
    fn schema(&self) -> Schema {
        Schema::new(self.fields.iter().cloned())
    }

    fn translate(&self, message: &str) -> Result<Record> {
        let mut record = Map::new();

        for pair in message.split(self.delimiter.as_str()) {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("malformed key=value pair: '{pair}'");
            };
            record.insert(key.trim().to_string(), parse_scalar(value));
        }

        Ok(JsonValue::Object(record))
    }
}

/// Narrowest matching JSON scalar: integer, then float, then bool, then
/// string.
fn parse_scalar(value: &str) -> JsonValue {
    let value = value.trim();

    if let Ok(i) = value.parse::<i64>() {
        return JsonValue::from(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return JsonValue::from(f);
    }
    if let Ok(b) = value.parse::<bool>() {
        return JsonValue::from(b);
    }

    JsonValue::from(value)
}
