use serde_json::Value;

use super::{ExtractionError, ExtractionResult};
use crate::schema::{CaptureIndex, ExtractionRule, RuleKind};

/// Scans the whole text, collecting the configured capture group of every
/// non-overlapping match. An optional group that did not participate yields
/// `null`.
pub fn resolve(rule: &ExtractionRule, text: &str) -> ExtractionResult<Vec<Value>> {
    let RuleKind::Regex { pattern, capture } = &rule.kind else {
        return Err(ExtractionError::ExtractionType {
            field: rule.name.clone(),
            reason: format!("\"{}\" rules do not apply to text documents", rule.kind.as_str()),
        });
    };

    Ok(pattern
        .captures_iter(text)
        .map(|captures| {
            let group = match capture {
                CaptureIndex::Number(n) => captures.get(*n),
                CaptureIndex::Name(name) => captures.name(name),
            };
            group.map_or(Value::Null, |m| Value::String(m.as_str().to_string()))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DocumentType, ExtractionSchema};
    use serde_json::json;

    fn rule(definition: Value) -> ExtractionRule {
        let extract = json!({ "field": definition });
        ExtractionSchema::from_config(DocumentType::Text, extract.as_object().unwrap())
            .unwrap()
            .rules
            .remove(0)
    }

    #[test]
    fn test_whole_match_by_default() {
        let values = resolve(&rule(json!({"regexp": "\\d+"})), "1 and 22 and 333").unwrap();
        assert_eq!(values, vec![json!("1"), json!("22"), json!("333")]);
    }

    #[test]
    fn test_named_group() {
        let values = resolve(
            &rule(json!({"regexp": "v(?<version>\\d+\\.\\d+)", "index": "version"})),
            "v1.2, v3.4",
        )
        .unwrap();
        assert_eq!(values, vec![json!("1.2"), json!("3.4")]);
    }

    #[test]
    fn test_unmatched_optional_group_is_null() {
        let values = resolve(&rule(json!({"regexp": "a(b)?", "index": 1})), "ab a").unwrap();
        assert_eq!(values, vec![json!("b"), Value::Null]);
    }
}
