//! Tera-backed `TemplateEngine`. The template set (the main HAProxy config template plus its
//! snippets/maps/files/certificates) comes entirely from `Config`, so it is rebuilt fresh on
//! every render rather than cached - cheap relative to a render, and it sidesteps having to
//! diff the previous template set on reinit.

use std::collections::BTreeMap;

use tera::{Context, Tera};

use htic_core::config::Config;
use htic_core::external::{RenderedTemplate, TemplateEngine, TemplateError};
use htic_core::watch::store::StoreSnapshot;

const MAIN_TEMPLATE: &str = "__haproxy_config__";

#[derive(Default)]
pub struct TeraTemplateEngine;

impl TeraTemplateEngine {
    pub fn new() -> Self {
        Self
    }
}

fn build_tera(config: &Config) -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    let mut templates: Vec<(&str, &str)> = vec![(MAIN_TEMPLATE, config.haproxy_config.template.as_str())];
    for (name, snippet) in &config.template_snippets {
        templates.push((name.as_str(), snippet.template.as_str()));
    }
    for (name, named) in config
        .maps
        .iter()
        .chain(config.files.iter())
        .chain(config.ssl_certificates.iter())
    {
        templates.push((name.as_str(), named.template.as_str()));
    }
    tera.add_raw_templates(templates)?;
    Ok(tera)
}

fn stores_context(stores: &BTreeMap<String, StoreSnapshot>) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for (name, snapshot) in stores {
        let items: Vec<serde_json::Value> = snapshot.items.iter().map(|(_, value)| value.clone()).collect();
        out.insert(name.clone(), serde_json::Value::Array(items));
    }
    serde_json::Value::Object(out)
}

impl TemplateEngine for TeraTemplateEngine {
    fn render(&self, config: &Config, stores: &BTreeMap<String, StoreSnapshot>) -> Result<RenderedTemplate, TemplateError> {
        let tera = build_tera(config).map_err(|err| TemplateError {
            template_name: "haproxy_config".to_string(),
            message: err.to_string(),
        })?;

        let mut context = Context::new();
        context.insert("resources", &stores_context(stores));

        let config_bytes = tera
            .render(MAIN_TEMPLATE, &context)
            .map_err(|err| TemplateError {
                template_name: "haproxy_config".to_string(),
                message: err.to_string(),
            })?
            .into_bytes();

        let mut aux_files = BTreeMap::new();
        for name in config.maps.keys().chain(config.files.keys()).chain(config.ssl_certificates.keys()) {
            let rendered = tera.render(name, &context).map_err(|err| TemplateError {
                template_name: name.clone(),
                message: err.to_string(),
            })?;
            aux_files.insert(name.clone(), rendered.into_bytes());
        }

        Ok(RenderedTemplate { config_bytes, aux_files })
    }

    fn validate(&self, template_body: &str) -> Result<(), TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_template("__validate__", template_body).map_err(|err| TemplateError {
            template_name: "validate".to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_main_template_and_aux_files() {
        let mut config = Config::default_for_test();
        config.haproxy_config.template = "global\n{% for r in resources.pods %}server {{ r.name }}\n{% endfor %}".to_string();
        config.maps.insert(
            "hosts.map".to_string(),
            htic_core::config::NamedTemplate {
                template: "static\n".to_string(),
            },
        );

        let mut stores = BTreeMap::new();
        stores.insert(
            "pods".to_string(),
            StoreSnapshot {
                items: vec![(vec!["a".to_string()], serde_json::json!({"name": "pod-a"}))],
            },
        );

        let engine = TeraTemplateEngine::new();
        let rendered = engine.render(&config, &stores).unwrap();
        assert!(String::from_utf8(rendered.config_bytes).unwrap().contains("server pod-a"));
        assert_eq!(rendered.aux_files.get("hosts.map").map(|b| b.as_slice()), Some(b"static\n".as_slice()));
    }

    #[test]
    fn validate_rejects_malformed_template() {
        let engine = TeraTemplateEngine::new();
        assert!(engine.validate("{% if %}").is_err());
    }
}
