//! Structural checks that need nothing but the parsed `Config` itself: no empty pod selector,
//! sane dataplane paths, and at least a haproxy_config template body.

use crate::config::Config;

pub fn validate_basic(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.pod_selector.match_labels.is_empty() {
        errors.push("pod_selector.match_labels must not be empty".to_string());
    }
    if config.haproxy_config.template.trim().is_empty() {
        errors.push("haproxy_config.template must not be empty".to_string());
    }
    for field in [
        &config.dataplane.maps_dir,
        &config.dataplane.ssl_certs_dir,
        &config.dataplane.general_storage_dir,
        &config.dataplane.config_file,
    ] {
        if field.trim().is_empty() {
            errors.push("dataplane paths must not be empty".to_string());
            break;
        }
    }
    if config.dataplane.min_deployment_interval.is_zero() {
        errors.push("dataplane.min_deployment_interval must be greater than zero".to_string());
    }
    for (name, resource) in &config.watched_resources {
        if resource.kind.is_none() && resource.resources.is_none() {
            errors.push(format!("watched_resources.{name} must set kind or resources"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
