use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use tracing::{error, info};

mod config;
mod controller;
mod cycle;
mod engine;
mod error;
mod extractor;
mod filter;
mod marker;
mod metrics;
mod patch;
mod reference;
mod target;
mod webserver;
mod workload;

use engine::Engine;
use filter::WorkloadKind;
use metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("starting cascader {}", env!("CARGO_PKG_VERSION"));

    let config = config::load_from_env()?;
    let client = create_client().await?;
    let metrics = Metrics::new();
    let engine = Engine::new(client, config, metrics.clone());

    let deployments = tokio::spawn(controller::run::<Deployment>(
        engine.clone(),
        WorkloadKind::Deployment,
    ));
    let statefulsets = tokio::spawn(controller::run::<StatefulSet>(
        engine.clone(),
        WorkloadKind::StatefulSet,
    ));
    let daemonsets = tokio::spawn(controller::run::<DaemonSet>(
        engine.clone(),
        WorkloadKind::DaemonSet,
    ));

    let app = webserver::create_app(metrics);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 8080));
    info!("starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        result = deployments => log_watch_exit("Deployment", result),
        result = statefulsets => log_watch_exit("StatefulSet", result),
        result = daemonsets => log_watch_exit("DaemonSet", result),
    }

    Ok(())
}

fn log_watch_exit(kind: &str, result: Result<Result<(), error::Error>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!(kind, "watch loop ended"),
        Ok(Err(e)) => error!(kind, error = %e, "watch loop failed"),
        Err(e) => error!(kind, error = %e, "watch task panicked"),
    }
}

async fn create_client() -> anyhow::Result<kube::Client> {
    let client = kube::Client::try_default().await?;
    let version = client.apiserver_version().await?;
    info!(
        "connected to Kubernetes API server version {}.{}",
        version.major, version.minor
    );
    Ok(client)
}
