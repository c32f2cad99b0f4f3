//! Validates every `index_by` and `ignore_fields` expression in the config against the
//! external `JsonPathEvaluator`, so a typo'd expression is caught at config-validation time
//! rather than silently producing an empty index key at watch time.

use crate::config::Config;
use crate::external::JsonPathEvaluator;

pub fn validate_jsonpaths(config: &Config, evaluator: &dyn JsonPathEvaluator) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    for expr in &config.watched_resources_ignore_fields {
        if let Err(err) = evaluator.validate_expr(expr) {
            errors.push(format!("watched_resources_ignore_fields[{expr}]: {err}"));
        }
    }
    for (name, resource) in &config.watched_resources {
        for expr in &resource.index_by {
            if let Err(err) = evaluator.validate_expr(expr) {
                errors.push(format!("watched_resources.{name}.index_by[{expr}]: {err}"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreKind, WatchedResource};

    struct RejectsDollarOnly;
    impl JsonPathEvaluator for RejectsDollarOnly {
        fn validate_expr(&self, expr: &str) -> Result<(), String> {
            if expr == "$" {
                Err("expression must select a field".to_string())
            } else {
                Ok(())
            }
        }
        fn extract(&self, _obj: &serde_json::Value, _expr: &str) -> Option<serde_json::Value> {
            None
        }
    }

    #[test]
    fn flags_bad_index_by_expression() {
        let mut config = Config::default_for_test();
        config.watched_resources.insert(
            "ingresses".to_string(),
            WatchedResource {
                api_version: "networking.k8s.io/v1".to_string(),
                kind: Some("Ingress".to_string()),
                resources: None,
                label_selector: None,
                index_by: vec!["$".to_string()],
                store: StoreKind::Full,
                enable_validation_webhook: false,
            },
        );
        let errors = validate_jsonpaths(&config, &RejectsDollarOnly).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("watched_resources.ingresses.index_by"));
    }
}
