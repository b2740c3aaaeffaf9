use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use kube_watchman::k8s::{
    Controller, ControllerContext, HttpApi, KubeApi, ResourceAccess, ResourceMeta, USER_AGENT,
    WatchTransport,
};
use kube_watchman::watch::{
    EventHandler, EventHandlerConfig, EventHandlerParams, LivenessInterval, RequestOptions,
};
use kube_watchman::watch::config::{LABEL_SELECTOR_PARAM, TIMEOUT_SECONDS_PARAM};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Group-version path of the resource, e.g. /api/v1 or /apis/apps/v1
    #[arg(long, default_value = "/api/v1")]
    api_path: String,

    /// Plural resource name, e.g. configmaps
    #[arg(short, long)]
    resource: String,

    #[arg(long, default_value = "")]
    kind: String,

    /// Treat the resource as cluster scoped
    #[arg(long)]
    cluster_scoped: bool,

    /// Only watch this namespace
    #[arg(short, long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Server-side watch timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout_seconds: u64,

    #[arg(short, long)]
    label_selector: Option<String>,

    /// Talk plain HTTP to this url (e.g. `kubectl proxy`) instead of the inferred kube config
    #[arg(long, env = "KUBE_PROXY_URL")]
    proxy_url: Option<String>,

    /// Liveness touch interval in milliseconds, 0 disables
    #[arg(long, env = "LIVENESS_INTERVAL", default_value_t = 0)]
    liveness_interval: u64,

    #[arg(long, env = "LIVENESS_PATH")]
    liveness_path: Option<PathBuf>,

    /// Seconds between enforcement sweeps, 0 disables
    #[arg(long, env = "ENFORCEMENT_INTERVAL", default_value_t = 0)]
    enforcement_interval: u64,

    #[arg(long, env = "FINALIZER")]
    finalizer: Option<String>,

    /// JSON event handler settings; flags above override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Logs every event it is given
struct LoggingController {
    context: ControllerContext,
}

#[async_trait]
impl Controller for LoggingController {
    async fn execute(&mut self) {
        let context = &self.context;
        context.span.in_scope(|| {
            info!(
                "{} {} {}",
                context.event.event_type,
                context.resource.name(),
                context.event.object_ref()
            );
        });
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = tracing_subscriber::fmt::layer().with_target(false).with_filter(filter);
    tracing_subscriber::registry().with(layer).init();
}

fn load_config(args: &Args) -> anyhow::Result<EventHandlerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EventHandlerConfig::default(),
    };
    if args.liveness_interval > 0 {
        config.liveness_interval = LivenessInterval::Millis(args.liveness_interval);
    }
    if let Some(path) = &args.liveness_path {
        config.liveness_path.clone_from(path);
    }
    if args.enforcement_interval > 0 {
        config.enforcement_interval = args.enforcement_interval;
    }
    if args.finalizer.is_some() {
        config.finalizer_string.clone_from(&args.finalizer);
    }
    if args.namespace.is_some() {
        config.namespace.clone_from(&args.namespace);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = load_config(&args)?;

    let (transport, access) = match &args.proxy_url {
        Some(url) => {
            let api = Arc::new(HttpApi::new(url.as_str())?);
            (api.clone() as Arc<dyn WatchTransport>, api as Arc<dyn ResourceAccess>)
        }
        None => {
            let api = Arc::new(KubeApi::infer(Some(USER_AGENT)).await?);
            (api.clone() as Arc<dyn WatchTransport>, api as Arc<dyn ResourceAccess>)
        }
    };

    let mut api_config =
        RequestOptions::default().query(TIMEOUT_SECONDS_PARAM, args.timeout_seconds.to_string());
    if let Some(selector) = &args.label_selector {
        api_config = api_config.query(LABEL_SELECTOR_PARAM, selector.as_str());
    }
    let resource = ResourceMeta::new(
        args.api_path.as_str(),
        APIResource {
            name: args.resource.clone(),
            kind: args.kind.clone(),
            namespaced: !args.cluster_scoped,
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..APIResource::default()
        },
        api_config,
    );

    let mut handler = EventHandler::new(EventHandlerParams {
        resource,
        access,
        factory: Arc::new(|context: ControllerContext| LoggingController { context }),
        transport,
        config,
    })?;

    tokio::signal::ctrl_c().await?;
    handler.shutdown();
    Ok(())
}
