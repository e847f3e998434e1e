use crate::{
    k8s::{labels, Ingress, Resource, Route, RoutingInstance, Service},
    metrics::ControllerMetrics,
    reconcile::{self, Context},
    solvers::{Dispatcher, Platform, ProxyConfig, RoutingConfig},
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use kube::{
    runtime::{controller, watcher, Controller},
    Api, Client,
};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "routing", about = "A workspace routing controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "workspace_routing=info,warn",
        env = "WORKSPACE_ROUTING_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The routing class applied to instances that do not set one.
    #[clap(long, env = "WORKSPACE_ROUTING_DEFAULT_CLASS")]
    default_routing_class: Option<String>,

    /// The domain under which endpoint hostnames are created when an instance
    /// does not set a routing suffix.
    #[clap(long, env = "WORKSPACE_ROUTING_CLUSTER_HOST_SUFFIX")]
    cluster_host_suffix: Option<String>,

    /// Annotations (`k=v,k=v`) that replace the defaults on generated
    /// Ingresses. An empty value removes the defaults.
    #[clap(long, env = "WORKSPACE_ROUTING_INGRESS_ANNOTATIONS")]
    ingress_annotations: Option<Annotations>,

    /// Annotations (`k=v,k=v`) that replace the defaults on generated Routes.
    /// An empty value removes the defaults.
    #[clap(long, env = "WORKSPACE_ROUTING_ROUTE_ANNOTATIONS")]
    route_annotations: Option<Annotations>,

    #[clap(long, value_enum, default_value = "auto", env = "WORKSPACE_ROUTING_PLATFORM")]
    platform: PlatformArg,

    #[clap(
        long,
        default_value = ProxyConfig::DEFAULT_IMAGE,
        env = "WORKSPACE_ROUTING_OAUTH_PROXY_IMAGE"
    )]
    oauth_proxy_image: String,

    #[clap(long, env = "WORKSPACE_ROUTING_SIDECAR_PULL_POLICY")]
    sidecar_pull_policy: Option<String>,

    /// The number of routing instances reconciled concurrently.
    #[clap(long, default_value = "4", env = "WORKSPACE_ROUTING_WORKERS")]
    workers: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum PlatformArg {
    /// Detects OpenShift by probing for the Route API.
    Auto,
    Kubernetes,
    #[value(name = "openshift")]
    OpenShift,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Annotations(labels::Map);

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            default_routing_class,
            cluster_host_suffix,
            ingress_annotations,
            route_annotations,
            platform,
            oauth_proxy_image,
            sidecar_pull_policy,
            workers,
        } = self;

        if workers == 0 {
            bail!("--workers must be positive");
        }

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("routing"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let platform = match platform {
            PlatformArg::Kubernetes => Platform::Kubernetes,
            PlatformArg::OpenShift => Platform::OpenShift,
            PlatformArg::Auto if api_resource_exists::<Route>(&client).await => Platform::OpenShift,
            PlatformArg::Auto => Platform::Kubernetes,
        };
        info!(?platform, "Detected cluster platform");

        let config = RoutingConfig {
            platform,
            default_routing_class,
            cluster_host_suffix,
            ingress_annotations: ingress_annotations.map(|Annotations(a)| a),
            route_annotations: route_annotations.map(|Annotations(a)| a),
            proxy: ProxyConfig {
                image: oauth_proxy_image,
                pull_policy: sidecar_pull_policy,
            },
        };
        let ctx = Arc::new(Context::new(
            client.clone(),
            Dispatcher::new(config),
            metrics,
        ));

        tokio::spawn(
            controller(client, platform, workers, ctx, runtime.shutdown_handle())
                .instrument(info_span!("routing")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Runs the routing controller until the runtime begins shutting down.
///
/// Routing instances are watched directly. Changes to the objects they own
/// trigger a reconcile of the owning instance.
async fn controller(
    client: Client,
    platform: Platform,
    workers: u16,
    ctx: Arc<Context>,
    drain: drain::Watch,
) {
    let owned = || watcher::Config::default().labels(labels::WORKSPACE_ID);

    let mut routings = Controller::new(
        Api::<RoutingInstance>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(Api::<Service>::all(client.clone()), owned())
    .owns(Api::<Ingress>::all(client.clone()), owned());
    if platform.is_openshift() {
        routings = routings.owns(Api::<Route>::all(client), owned());
    }

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let ctrl = routings
        .with_config(controller::Config::default().concurrency(workers))
        .graceful_shutdown_on(close_rx.map(|_| ()))
        .run(
            reconcile::reconcile::<Client>,
            reconcile::error_policy::<Client>,
            ctx,
        )
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => tracing::debug!(%obj, ?action, "Reconciled"),
                Err(error) => tracing::debug!(%error, "Reconcile failed"),
            }
        });
    tokio::pin!(ctrl);

    info!(workers, "Routing controller started");
    tokio::select! {
        _ = (&mut ctrl) => {}
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(ctrl).await;
        }
    }
}

// === impl Annotations ===

impl std::str::FromStr for Annotations {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|kv| !kv.is_empty())
            .map(|kv| match kv.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => {
                    Ok((k.trim().to_string(), v.trim().to_string()))
                }
                _ => bail!("invalid annotation {kv:?}; expected key=value"),
            })
            .collect::<Result<_>>()
            .map(Self)
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
