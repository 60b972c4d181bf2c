use serde_json::Value;

use super::{ExtractionError, ExtractionResult};
use crate::schema::{ExtractionRule, RuleKind};

/// Every node matched by the rule's path, in document order.
pub fn resolve(rule: &ExtractionRule, document: &Value) -> ExtractionResult<Vec<Value>> {
    match &rule.kind {
        RuleKind::JsonPath { compiled, .. } => {
            Ok(compiled.query(document).all().into_iter().cloned().collect())
        }
        other => Err(ExtractionError::ExtractionType {
            field: rule.name.clone(),
            reason: format!("\"{}\" rules do not apply to JSON documents", other.as_str()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DocumentType, ExtractionSchema};
    use serde_json::json;

    fn rule(path: &str) -> ExtractionRule {
        let extract = json!({ "field": { "path": path } });
        ExtractionSchema::from_config(DocumentType::Json, extract.as_object().unwrap())
            .unwrap()
            .rules
            .remove(0)
    }

    #[test]
    fn test_wildcard_path() {
        let doc = json!({"data": {"items": [
            {"title": "a", "tags": ["x"]},
            {"title": "b", "tags": []},
        ]}});
        assert_eq!(
            resolve(&rule("data.items[*].title"), &doc).unwrap(),
            vec![json!("a"), json!("b")]
        );
        assert_eq!(
            resolve(&rule("$.data.items[*].tags"), &doc).unwrap(),
            vec![json!(["x"]), json!([])]
        );
    }

    #[test]
    fn test_missing_path_is_empty() {
        assert!(resolve(&rule("nope"), &json!({"a": 1})).unwrap().is_empty());
    }

    #[test]
    fn test_structured_values_survive() {
        let doc = json!({"when": {"y": 2024, "m": 5}});
        assert_eq!(resolve(&rule("when"), &doc).unwrap(), vec![json!({"y": 2024, "m": 5})]);
    }
}
