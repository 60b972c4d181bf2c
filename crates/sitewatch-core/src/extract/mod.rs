pub(crate) mod css;
mod json;
mod markup;
mod text;

use serde_json::Value;
use thiserror::Error;

pub use markup::MarkupDocument;

use crate::align::{align, Aligned, UnevenPolicy};
use crate::schema::{DocumentType, ExtractionRule, ExtractionSchema};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Document is not valid {doc_type}: {reason}")]
    Parse {
        doc_type: &'static str,
        reason: String,
    },
    #[error("Unexpected result for {field}: {reason}")]
    ExtractionType { field: String, reason: String },
    #[error("Evaluation of {field} failed: {reason}")]
    Evaluation { field: String, reason: String },
    #[error("Got an uneven number of matches for {field}: expected {expected}, got {actual}")]
    UnevenSize {
        field: String,
        expected: usize,
        actual: usize,
    },
    #[error("At least one non-repeat key is required")]
    NoTupleSize,
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Parses `body` as the schema's document type and aligns every rule's
/// matches into row tuples.
pub fn extract(
    schema: &ExtractionSchema,
    body: &str,
    policy: UnevenPolicy,
) -> ExtractionResult<Aligned> {
    match schema.doc_type {
        DocumentType::Html => {
            let document = MarkupDocument::parse_html(body);
            align(&schema.rules, policy, |rule| {
                Ok(wrap_array(rule, document.resolve(rule)?))
            })
        }
        DocumentType::Xml => {
            let document = MarkupDocument::parse_xml(body)?;
            align(&schema.rules, policy, |rule| {
                Ok(wrap_array(rule, document.resolve(rule)?))
            })
        }
        DocumentType::Json => {
            let document: Value =
                serde_json::from_str(body).map_err(|e| ExtractionError::Parse {
                    doc_type: "json",
                    reason: e.to_string(),
                })?;
            if schema.is_passthrough() {
                return passthrough(document);
            }
            align(&schema.rules, policy, |rule| {
                Ok(wrap_array(rule, json::resolve(rule, &document)?))
            })
        }
        DocumentType::Text => align(&schema.rules, policy, |rule| {
            Ok(wrap_array(rule, text::resolve(rule, body)?))
        }),
    }
}

fn passthrough(document: Value) -> ExtractionResult<Aligned> {
    match document {
        Value::Object(map) => Ok(Aligned::single(map)),
        other => Err(ExtractionError::ExtractionType {
            field: "$".to_string(),
            reason: format!("passthrough requires a JSON object, got {}", kind_of(&other)),
        }),
    }
}

fn wrap_array(rule: &ExtractionRule, values: Vec<Value>) -> Vec<Value> {
    if rule.as_array {
        vec![Value::Array(values)]
    } else {
        values
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
