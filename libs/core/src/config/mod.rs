//! The typed config/credentials snapshots produced by the loaders  plus the YAML shape
//! they are parsed from (the configuration schema).

pub mod loader;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_priority() -> u32 {
    500
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PodSelector {
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LeaderElectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub lease_name: String,
    #[serde(with = "humantime_serde", default = "default_15s")]
    pub lease_duration: Duration,
    #[serde(with = "humantime_serde", default = "default_10s")]
    pub renew_deadline: Duration,
    #[serde(with = "humantime_serde", default = "default_2s")]
    pub retry_period: Duration,
}

fn default_true() -> bool {
    true
}
fn default_15s() -> Duration {
    Duration::from_secs(15)
}
fn default_10s() -> Duration {
    Duration::from_secs(10)
}
fn default_2s() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControllerSettings {
    #[serde(default = "default_healthz_port")]
    pub healthz_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub leader_election: LeaderElectionConfig,
}

fn default_healthz_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lease_name: "haproxy-template-ic".to_string(),
            lease_duration: default_15s(),
            renew_deadline: default_10s(),
            retry_period: default_2s(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataplaneSettings {
    #[serde(default = "default_dataplane_port")]
    pub port: u16,
    #[serde(with = "humantime_serde", default = "default_min_deployment_interval")]
    pub min_deployment_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_drift_prevention_interval")]
    pub drift_prevention_interval: Duration,
    pub maps_dir: String,
    pub ssl_certs_dir: String,
    pub general_storage_dir: String,
    pub config_file: String,
}

fn default_dataplane_port() -> u16 {
    5555
}
fn default_min_deployment_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_drift_prevention_interval() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Full,
    #[serde(rename = "on-demand")]
    OnDemand,
}

impl Default for StoreKind {
    fn default() -> Self {
        StoreKind::Full
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatchedResource {
    pub api_version: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub resources: Option<String>,
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub index_by: Vec<String>,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub enable_validation_webhook: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TemplateSnippet {
    pub template: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamedTemplate {
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HaproxyConfigTemplate {
    pub template: String,
}

/// The immutable snapshot produced by the Config Loader.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    pub pod_selector: PodSelector,
    #[serde(default)]
    pub controller: ControllerSettings,
    pub dataplane: DataplaneSettings,
    #[serde(default)]
    pub watched_resources_ignore_fields: Vec<String>,
    #[serde(default)]
    pub watched_resources: BTreeMap<String, WatchedResource>,
    #[serde(default)]
    pub template_snippets: BTreeMap<String, TemplateSnippet>,
    #[serde(default)]
    pub maps: BTreeMap<String, NamedTemplate>,
    #[serde(default)]
    pub files: BTreeMap<String, NamedTemplate>,
    #[serde(default)]
    pub ssl_certificates: BTreeMap<String, NamedTemplate>,
    pub haproxy_config: HaproxyConfigTemplate,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            healthz_port: default_healthz_port(),
            metrics_port: default_metrics_port(),
            leader_election: LeaderElectionConfig::default(),
        }
    }
}

impl Config {
    /// A minimal, schema-valid config used by unit tests across the crate.
    #[cfg(any(test, feature = "test-util"))]
    pub fn default_for_test() -> Self {
        Config {
            pod_selector: PodSelector {
                match_labels: BTreeMap::from([("app".to_string(), "haproxy".to_string())]),
            },
            controller: ControllerSettings::default(),
            dataplane: DataplaneSettings {
                port: default_dataplane_port(),
                min_deployment_interval: Duration::from_millis(100),
                drift_prevention_interval: Duration::from_secs(60),
                maps_dir: "/etc/haproxy/maps".to_string(),
                ssl_certs_dir: "/etc/haproxy/ssl".to_string(),
                general_storage_dir: "/etc/haproxy/general".to_string(),
                config_file: "/etc/haproxy/haproxy.cfg".to_string(),
            },
            watched_resources_ignore_fields: Vec::new(),
            watched_resources: BTreeMap::new(),
            template_snippets: BTreeMap::new(),
            maps: BTreeMap::new(),
            files: BTreeMap::new(),
            ssl_certificates: BTreeMap::new(),
            haproxy_config: HaproxyConfigTemplate {
                template: "global\n".to_string(),
            },
        }
    }
}

/// Opaque key/value map produced from the secret snapshot (the data model's Credentials entry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub values: BTreeMap<String, String>,
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        if let Some(secs) = trimmed.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(ms) = trimmed.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else {
            trimmed
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
pod_selector:
  match_labels:
    app: haproxy
dataplane:
  min_deployment_interval: "5s"
  drift_prevention_interval: "300s"
  maps_dir: /etc/haproxy/maps
  ssl_certs_dir: /etc/haproxy/ssl
  general_storage_dir: /etc/haproxy/general
  config_file: /etc/haproxy/haproxy.cfg
haproxy_config:
  template: "global\n"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.controller.healthz_port, 8080);
        assert_eq!(config.dataplane.min_deployment_interval, Duration::from_secs(5));
        assert!(config.controller.leader_election.enabled);
    }
}
