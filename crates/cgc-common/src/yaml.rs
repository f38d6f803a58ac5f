//! YAML helpers
//!
//! Rendered templates are parsed with yaml-rust2 into `serde_json::Value`, the
//! document type used everywhere else (rendering context, type resolution,
//! server-side apply). Serialization back to YAML for the `toYaml` template
//! helper goes through serde_yaml.
//!
//! Plain scalars follow the YAML 1.2 core schema, not YAML 1.1 as most
//! Kubernetes tooling does: `yes`/`on`/`off` stay strings and `0644` is the
//! decimal 644. Templates should quote such values or write octals as `0o644`.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Why rendered text is not a usable resource document
#[derive(Debug, Clone, Error)]
pub enum YamlError {
    /// Text is not YAML
    #[error("invalid YAML: {0}")]
    Syntax(String),

    /// More than one `---` separated document
    #[error("expected a single document, found {0}")]
    MultipleDocuments(usize),

    /// Nothing but whitespace or comments
    #[error("document is empty")]
    Empty,

    /// Top level is a scalar or a sequence
    #[error("expected a mapping, found {0}")]
    NotAMapping(&'static str),

    /// A node has no JSON equivalent
    #[error("unsupported YAML {0}")]
    Unsupported(&'static str),
}

/// Parse text that must hold exactly one mapping document.
///
/// Rendered resource templates always describe a single Kubernetes object,
/// so scalars, sequences, empty output and multi-document streams are errors.
pub fn parse_yaml_object(input: &str) -> Result<Map<String, Value>, YamlError> {
    let mut docs =
        YamlLoader::load_from_str(input).map_err(|e| YamlError::Syntax(e.to_string()))?;
    if docs.len() > 1 {
        return Err(YamlError::MultipleDocuments(docs.len()));
    }
    let Some(doc) = docs.pop() else {
        return Err(YamlError::Empty);
    };
    match to_json(doc)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(YamlError::Empty),
        Value::Array(_) => Err(YamlError::NotAMapping("sequence")),
        _ => Err(YamlError::NotAMapping("scalar")),
    }
}

/// Serialize any value to a YAML block without a trailing newline.
pub fn to_yaml<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_yaml::Error> {
    let mut out = serde_yaml::to_string(value)?;
    out.truncate(out.trim_end_matches('\n').len());
    Ok(out)
}

fn to_json(node: Yaml) -> Result<Value, YamlError> {
    Ok(match node {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::from(i),
        // Non-finite floats have no JSON form
        Yaml::Real(text) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => {
            Value::Array(items.into_iter().map(to_json).collect::<Result<_, _>>()?)
        }
        Yaml::Hash(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(key_string(key)?, to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(YamlError::Unsupported("alias")),
        Yaml::BadValue => return Err(YamlError::Unsupported("value")),
    })
}

/// Mapping keys become strings; YAML lets them be any scalar.
fn key_string(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(YamlError::Unsupported("mapping key")),
    }
}
