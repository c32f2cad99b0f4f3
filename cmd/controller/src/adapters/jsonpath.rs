//! `JsonPathEvaluator` backed by `jsonpath-rust`. Used both by the JSONPath config validator
//! (syntax only) and by the Store's `index_by` extraction (parse + evaluate against a live
//! resource body).

use jsonpath_rust::{JsonPathInst, JsonPathQuery};

use htic_core::external::JsonPathEvaluator;

#[derive(Default)]
pub struct JsonPathRustEvaluator;

impl JsonPathRustEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl JsonPathEvaluator for JsonPathRustEvaluator {
    fn validate_expr(&self, expr: &str) -> Result<(), String> {
        expr.parse::<JsonPathInst>().map(|_| ()).map_err(|err| err.to_string())
    }

    fn extract(&self, obj: &serde_json::Value, expr: &str) -> Option<serde_json::Value> {
        match obj.clone().path(expr).ok()? {
            serde_json::Value::Array(mut matches) if !matches.is_empty() => Some(matches.remove(0)),
            serde_json::Value::Null => None,
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_well_formed_expression() {
        let evaluator = JsonPathRustEvaluator::new();
        assert!(evaluator.validate_expr("$.metadata.name").is_ok());
    }

    #[test]
    fn rejects_malformed_expression() {
        let evaluator = JsonPathRustEvaluator::new();
        assert!(evaluator.validate_expr("$.[[[").is_err());
    }

    #[test]
    fn extracts_matching_field() {
        let evaluator = JsonPathRustEvaluator::new();
        let obj = serde_json::json!({"metadata": {"name": "pod-a"}});
        let extracted = evaluator.extract(&obj, "$.metadata.name").unwrap();
        assert_eq!(extracted, serde_json::json!("pod-a"));
    }
}
