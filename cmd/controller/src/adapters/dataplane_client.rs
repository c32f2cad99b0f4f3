//! `DataplaneClient` backed by `reqwest` against each instance's HAProxy Dataplane API
//! (`PUT /v3/services/haproxy/configuration/raw`). Basic-auth credentials are kept fresh by a
//! background task re-reading the credentials resource directly (the same ConfigMap-then-Secret
//! fallback `K8sKubeClient` uses for its one-shot fetch), independent of the core's own
//! per-iteration event bus so this adapter works the same whether or not the core is currently
//! between iterations.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;

use htic_core::event::PodEndpoint;
use htic_core::external::{DataplaneClient, DataplaneError, DataplanePushResult};

#[derive(Debug, Clone, Default)]
struct BasicAuth {
    username: String,
    password: Option<String>,
}

pub struct DataplaneHttpClient {
    http: reqwest::Client,
    port: u16,
    auth: std::sync::Arc<RwLock<BasicAuth>>,
}

impl DataplaneHttpClient {
    pub fn new(client: kube::Client, namespace: String, secret_resource_name: String, port: u16, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("reqwest client config is static and always valid");
        let auth = std::sync::Arc::new(RwLock::new(BasicAuth::default()));

        tokio::spawn(refresh_credentials_loop(client, namespace, secret_resource_name, auth.clone()));

        Self { http, port, auth }
    }

    fn basic_auth(&self) -> (String, Option<String>) {
        let auth = self.auth.read().unwrap();
        (auth.username.clone(), auth.password.clone())
    }
}

async fn refresh_credentials_loop(
    client: kube::Client,
    namespace: String,
    secret_resource_name: String,
    auth: std::sync::Arc<RwLock<BasicAuth>>,
) {
    loop {
        match fetch_basic_auth(&client, &namespace, &secret_resource_name).await {
            Ok(fresh) => *auth.write().unwrap() = fresh,
            Err(err) => tracing::warn!(error = %err, "failed to refresh dataplane credentials"),
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}

async fn fetch_basic_auth(client: &kube::Client, namespace: &str, name: &str) -> Result<BasicAuth, String> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    match configmaps.get(name).await {
        Ok(cm) => {
            let data = cm.data.unwrap_or_default();
            return Ok(from_map(&data));
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {}
        Err(err) => return Err(err.to_string()),
    }

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get(name).await.map_err(|e| e.to_string())?;
    let data: BTreeMap<String, String> = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, base64::engine::general_purpose::STANDARD.encode(value.0)))
        .collect();
    Ok(from_map(&data))
}

fn from_map(data: &BTreeMap<String, String>) -> BasicAuth {
    BasicAuth {
        username: data.get("username").cloned().unwrap_or_default(),
        password: data.get("password").cloned(),
    }
}

#[async_trait]
impl DataplaneClient for DataplaneHttpClient {
    async fn push(
        &self,
        endpoint: &PodEndpoint,
        config_bytes: &[u8],
        _aux_files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<DataplanePushResult, DataplaneError> {
        let url = format!(
            "https://{}:{}/v3/services/haproxy/configuration/raw?skip_version_check=true",
            endpoint.ip, self.port
        );
        let (username, password) = self.basic_auth();

        let response = self
            .http
            .put(&url)
            .basic_auth(username, password)
            .header("Content-Type", "text/plain")
            .body(config_bytes.to_vec())
            .send()
            .await
            .map_err(|err| DataplaneError::Transport(endpoint.name.clone(), err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(DataplanePushResult {
                reload_required: status.as_u16() == 202,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                Err(DataplaneError::Rejected(endpoint.name.clone(), format!("{status}: {body}")))
            } else {
                Err(DataplaneError::Transport(endpoint.name.clone(), format!("{status}: {body}")))
            }
        }
    }
}
