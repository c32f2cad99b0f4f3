#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::time::Duration;

    use k8s_openapi::api::core::v1::{ConfigMap, Pod};
    use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
    use kube::client::Client;
    use kube::runtime::wait::{await_condition, conditions};
    use serde_json::json;
    use tokio::time::timeout;

    const NAMESPACE: &str = "default";

    fn config_resource(name: &str, template: &str) -> ConfigMap {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name },
            "data": {
                "config.yaml": format!(
                    "pod_selector:\n  match_labels:\n    app: {name}-haproxy\ndataplane:\n  min_deployment_interval: \"1s\"\n  drift_prevention_interval: \"60s\"\n  maps_dir: /etc/haproxy/maps\n  ssl_certs_dir: /etc/haproxy/ssl\n  general_storage_dir: /etc/haproxy/general\n  config_file: /etc/haproxy/haproxy.cfg\nhaproxy_config:\n  template: \"{template}\"\n",
                    name = name,
                    template = template,
                ),
            },
        }))
        .unwrap()
    }

    async fn setup(client: &Client, name: &str, template: &str) -> Api<ConfigMap> {
        let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), NAMESPACE);
        configmaps
            .create(&PostParams::default(), &config_resource(name, template))
            .await
            .unwrap();
        configmaps
    }

    async fn teardown(configmaps: &Api<ConfigMap>, name: &str) {
        let _ = configmaps.delete(name, &DeleteParams::default()).await;
    }

    /// A single haproxy pod tagged for the config's pod selector should be observable through
    /// the controller's index once it starts watching - proven indirectly here by waiting for
    /// the pod to go Ready, the precondition for the controller ever attempting a Dataplane push.
    #[tokio::test]
    async fn haproxy_pod_becomes_ready_under_controller_pod_selector() {
        let client = Client::try_default().await.unwrap();
        let name = "e2e-haproxy-ready";
        let configmaps = setup(&client, name, "global\n").await;

        let pods: Api<Pod> = Api::namespaced(client.clone(), NAMESPACE);
        let pod: Pod = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "labels": { "app": format!("{name}-haproxy") } },
            "spec": {
                "containers": [{
                    "name": "haproxy",
                    "image": "haproxytech/haproxy-alpine:2.9",
                    "ports": [{ "containerPort": 5555 }],
                }],
            },
        }))
        .unwrap();
        pods.create(&PostParams::default(), &pod).await.unwrap();

        timeout(
            Duration::from_secs(60),
            await_condition(pods.clone(), name, conditions::is_pod_running()),
        )
        .await
        .unwrap()
        .unwrap();

        let _ = pods.delete(name, &DeleteParams::default()).await;
        teardown(&configmaps, name).await;
    }

    /// Replacing the config resource's template (a reinit-triggering change) should not leave
    /// the ConfigMap itself in an inconsistent state - the controller only ever reads it.
    #[tokio::test]
    async fn config_resource_update_is_idempotent_from_the_cluster_side() {
        let client = Client::try_default().await.unwrap();
        let name = "e2e-config-update";
        let configmaps = setup(&client, name, "global\n").await;

        let mut updated = config_resource(name, "global\n  maxconn 2048\n");
        updated.metadata.resource_version = configmaps.get(name).await.unwrap().metadata.resource_version;
        configmaps
            .patch(name, &PatchParams::apply("e2e-tests").force(), &Patch::Apply(&updated))
            .await
            .unwrap();

        let fetched = configmaps.get(name).await.unwrap();
        assert!(fetched.data.unwrap()["config.yaml"].contains("maxconn 2048"));

        teardown(&configmaps, name).await;
    }
}
