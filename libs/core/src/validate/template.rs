//! Syntax-only validation of every template body in the config, via the external
//! `TemplateEngine`. Does not touch cluster state - a template can be well-formed and still
//! fail to render against a particular Store snapshot later.

use crate::config::Config;
use crate::external::TemplateEngine;

pub fn validate_templates(config: &Config, engine: &dyn TemplateEngine) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if let Err(err) = engine.validate(&config.haproxy_config.template) {
        errors.push(format!("haproxy_config: {err}"));
    }
    for (name, snippet) in &config.template_snippets {
        if let Err(err) = engine.validate(&snippet.template) {
            errors.push(format!("template_snippets.{name}: {err}"));
        }
    }
    for (collection, templates) in [
        ("maps", &config.maps),
        ("files", &config.files),
        ("ssl_certificates", &config.ssl_certificates),
    ] {
        for (name, template) in templates {
            if let Err(err) = engine.validate(&template.template) {
                errors.push(format!("{collection}.{name}: {err}"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
