//! Duplicate suppression. The [KeyExtractor] derives a composite key from a payload and the
//! [cache::DedupCache] remembers recently seen keys.

use serde_json::Value;

use crate::Error;
use crate::error::Result;
use crate::expr::{Evaluator, PathEvaluator};

pub mod cache;

/// Joins the extracted values into a composite key.
pub const KEY_SEPARATOR: &str = "-";

/// Derives the composite key of a record from an ordered list of field paths.
#[derive(Debug, Clone)]
pub struct KeyExtractor<E = PathEvaluator> {
    paths: Vec<String>,
    evaluator: E,
}

impl KeyExtractor<PathEvaluator> {
    pub fn new<S: AsRef<str>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self::with_evaluator(paths, PathEvaluator)
    }
}

impl<E: Evaluator> KeyExtractor<E> {
    /// Paths are trimmed and empty ones discarded; their order is preserved.
    pub fn with_evaluator<S: AsRef<str>>(paths: impl IntoIterator<Item = S>, evaluator: E) -> Self {
        let paths = paths
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { paths, evaluator }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Returns `None` when no paths are configured, dedup does not apply then. The payload must
    /// be a JSON object.
    pub fn extract(&self, payload: &[u8]) -> Result<Option<String>> {
        if self.paths.is_empty() {
            return Ok(None);
        }

        let document: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Decode(format!("payload is not valid JSON: {e}")))?;
        if !document.is_object() {
            return Err(Error::Decode("payload is not a JSON object".to_string()));
        }

        let parts = self
            .paths
            .iter()
            .map(|path| {
                self.evaluator
                    .evaluate(path, &document)
                    .map(|value| key_part(&value))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(parts.join(KEY_SEPARATOR)))
    }
}

fn key_part(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // arrays and objects keep their compact JSON form
        other => other.to_string(),
    }
}
