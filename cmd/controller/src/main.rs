mod adapters;

use std::sync::Arc;
use std::time::Duration;

use actix_web::web::Data;
use actix_web::{get, middleware, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::{crate_authors, crate_description, crate_version, Parser};
use prometheus_client::registry::Registry;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use htic_core::orchestrator::{Collaborators, Orchestrator};
use htic_core::state_cache::StateCache;
use htic_core::telemetry;
use htic_k8s_util::client::new_client_with_metrics;

use adapters::dataplane_client::DataplaneHttpClient;
use adapters::haproxy_validator::HaproxyBinaryValidator;
use adapters::informer::K8sInformerFactory;
use adapters::jsonpath::JsonPathRustEvaluator;
use adapters::kube_client::K8sKubeClient;
use adapters::leader_election::K8sLeaderElectorFactory;
use adapters::template_engine::TeraTemplateEngine;

#[derive(Parser, Debug)]
#[command(
    name = "haproxy-template-ic",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port for /health and /metrics.
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Namespace the controller, its config/credentials resources and the haproxy pods live in.
    #[arg(long, env)]
    namespace: String,

    /// Name of the ConfigMap or Secret carrying the rendering configuration.
    #[arg(long, env)]
    config_resource_name: String,

    /// Name of the ConfigMap or Secret carrying Dataplane credentials.
    #[arg(long, env)]
    secret_resource_name: String,

    /// Identity this instance registers as when acquiring the leader-election Lease.
    #[arg(long, env = "POD_NAME")]
    pod_name: String,

    /// Path to the haproxy binary used for config-check validation.
    #[arg(long, default_value = "haproxy", env)]
    haproxy_binary: String,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format.
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint. Tracing is disabled if unset.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    state: watch::Receiver<Option<Arc<StateCache>>>,
}

/// Debug-variables endpoint backed by the State Cache's own read accessors: resource counts
/// per watched type and webhook validation stats. Returns 503 between iterations, when no
/// State Cache is live yet.
#[get("/debug/vars")]
async fn debug_vars(state: Data<AppState>, _req: HttpRequest) -> impl Responder {
    let cache = match state.state.borrow().clone() {
        Some(cache) => cache,
        None => return HttpResponse::ServiceUnavailable().json("state cache not available yet"),
    };

    let resource_counts = cache.resource_counts().await;
    let webhook_stats = cache.webhook_stats();

    HttpResponse::Ok().json(serde_json::json!({
        "resource_counts": resource_counts,
        "webhook_requests_total": webhook_stats.requests_total,
        "webhook_rejections_total": webhook_stats.rejections_total,
    }))
}

#[get("/metrics")]
async fn metrics_handler(state: Data<AppState>, _req: HttpRequest) -> impl Responder {
    let mut buffer = String::new();
    match prometheus_client::encoding::text::encode(&mut buffer, &state.registry) {
        Ok(()) => HttpResponse::Ok()
            .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
            .body(buffer),
        Err(err) => {
            tracing::error!(%err, "failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format, args.tracing_url.as_deref(), args.sample_ratio).await?;

    let mut registry = Registry::with_prefix("htic");
    let kube_config = kube::Config::infer().await?;
    let client = new_client_with_metrics(kube_config, &mut registry).await?;
    let core_metrics = Arc::new(htic_core::metrics::Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let dataplane_client = Arc::new(DataplaneHttpClient::new(
        client.clone(),
        args.namespace.clone(),
        args.secret_resource_name.clone(),
        5555,
        Duration::from_secs(10),
    ));

    let collaborators = Collaborators {
        kube_client: Arc::new(K8sKubeClient::new(client.clone(), args.namespace.clone())),
        informer_factory: Arc::new(K8sInformerFactory::new(client.clone(), args.namespace.clone())),
        leader_elector: Arc::new(K8sLeaderElectorFactory::new(
            client.clone(),
            args.namespace.clone(),
            args.pod_name.clone(),
            Duration::from_secs(15),
            Duration::from_secs(2),
        )),
        jsonpath_evaluator: Arc::new(JsonPathRustEvaluator::new()),
        template_engine: Arc::new(TeraTemplateEngine::new()),
        haproxy_validator: Arc::new(HaproxyBinaryValidator::new(
            args.haproxy_binary.clone(),
            "/etc/haproxy/maps".to_string(),
            "/etc/haproxy/ssl".to_string(),
            "/etc/haproxy/general".to_string(),
            "/etc/haproxy/haproxy.cfg".to_string(),
        )),
        dataplane_client: dataplane_client.clone(),
        metrics: core_metrics,
    };

    let orchestrator = Arc::new(Orchestrator::new(collaborators, args.config_resource_name, args.secret_resource_name));
    let state = orchestrator.subscribe_state();
    let cancel = CancellationToken::new();

    let orchestrator_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        async move { orchestrator.run(cancel).await }
    });

    let app_state = AppState { registry, state };
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(app_state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics_handler)
            .service(debug_vars)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    tokio::select! {
        result = server.run() => result?,
        _ = orchestrator_handle => {}
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
        }
    }

    Ok(())
}
