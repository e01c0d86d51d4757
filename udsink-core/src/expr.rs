//! Field-path expressions evaluated against a decoded JSON payload.
//!
//! The bundled [PathEvaluator] understands dotted paths with array indexing, `.keys[0].name`,
//! optionally rooted at `payload` (`payload.keys[0].name`). A path that does not resolve
//! evaluates to `null`.

use serde_json::Value;

use crate::Error;
use crate::error::Result;

/// Name of the optional root every path may start with.
pub const JSON_ROOT: &str = "payload";

/// Evaluates an expression against a JSON document. Implementations must be pure.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str, document: &Value) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathEvaluator;

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Field(&'a str),
    Index(usize),
}

fn parse(expression: &str) -> Result<Vec<Segment<'_>>> {
    let mut rest = expression
        .strip_prefix(JSON_ROOT)
        .filter(|rest| rest.is_empty() || rest.starts_with(['.', '[']))
        .unwrap_or(expression);

    let mut segments = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let (field, tail) = after.split_at(end);
            if field.is_empty() {
                // a lone "." addresses the whole document
                if tail.is_empty() && segments.is_empty() {
                    break;
                }
                return Err(Error::Expression(format!(
                    "empty field name in expression '{expression}'"
                )));
            }
            segments.push(Segment::Field(field));
            rest = tail;
        } else if let Some(after) = rest.strip_prefix('[') {
            let (index, tail) = after.split_once(']').ok_or_else(|| {
                Error::Expression(format!("unclosed '[' in expression '{expression}'"))
            })?;
            let index = index.trim().parse::<usize>().map_err(|e| {
                Error::Expression(format!(
                    "invalid index '{index}' in expression '{expression}': {e}"
                ))
            })?;
            segments.push(Segment::Index(index));
            rest = tail;
        } else {
            return Err(Error::Expression(format!(
                "unable to evaluate expression '{expression}': unexpected '{rest}'"
            )));
        }
    }
    Ok(segments)
}

impl Evaluator for PathEvaluator {
    fn evaluate(&self, expression: &str, document: &Value) -> Result<Value> {
        let segments = parse(expression)?;
        let resolved = segments
            .iter()
            .try_fold(document, |value, segment| match segment {
                Segment::Field(field) => value.get(field),
                Segment::Index(index) => value.get(index),
            });
        Ok(resolved.cloned().unwrap_or(Value::Null))
    }
}
