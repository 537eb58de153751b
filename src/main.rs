use crate::config::Config;
use crate::registry::EcrRegistry;
use crate::state::{ControllerContext, Target};
use crate::workload_store::KubeWorkloadStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod error;
mod image;
mod image_reference;
mod patch;
mod registry;
mod secret_string;
mod sigv4;
mod state;
#[cfg(test)]
mod test_utils;
mod webserver;
mod workload;
mod workload_store;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();
    info!("Starting ecr-autorollout {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    let kube_client = workload_store::create_client(&config.kubernetes).await?;
    let registry = EcrRegistry::new(&config.aws)?;
    let ctx = ControllerContext {
        registry: Arc::new(registry),
        workload_store: Arc::new(KubeWorkloadStore::new(kube_client)),
        target: Target {
            region: config.aws.region.clone(),
            repository: config.target.repository.clone(),
            channel_tag: config.target.channel_tag.clone(),
            workload: config.workload_ref(),
        },
    };

    let cancel = CancellationToken::new();
    let (reports, reports_rx) = watch::channel(None);
    let controller = tokio::spawn(controller::run(
        ctx,
        config.interval(),
        cancel.clone(),
        reports,
    ));

    let app = webserver::create_app(reports_rx);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // let an in-flight cycle finish before exiting
    cancel.cancel();
    controller.await?;
    info!("Stopped ecr-autorollout");

    Ok(())
}

/// `RUST_LOG` directives when set, otherwise every cycle outcome at info level and above.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new("info"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
