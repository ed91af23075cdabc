use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use kube::{Api, Client};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use kyverno_metrics::config::ControllerConfig;
use kyverno_metrics::health::{self, HealthState};
use kyverno_metrics::informer::{self, EventHandler};
use kyverno_metrics::metrics::{self, KyvernoMetrics, MetricsSink};
use kyverno_metrics::policy::{ClusterPolicy, Policy};
use kyverno_metrics::recorder::PolicyMetricsController;

#[derive(Parser)]
#[command(name = "kyverno-metrics", about = "Kyverno policy metrics controller")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "/etc/kyverno-metrics/config.yaml", env = "KYVERNO_METRICS_CONFIG")]
    config: String,
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, starting graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
        info!("received CTRL+C, starting graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}

async fn run_http_server(
    addr: SocketAddr,
    router: Router,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind HTTP on {addr}: {e}"));

    info!(%addr, "HTTP metrics/health server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            info!("HTTP server shutting down");
        })
        .await
        .unwrap_or_else(|e| error!("HTTP server error: {e}"));
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install default CryptoProvider");

    let cli = Cli::parse();

    let config = ControllerConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {e}", cli.config);
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        metrics_addr = %config.metrics_addr,
        log_level = %config.log_level,
        metrics.namespaces.include = ?config.metrics.namespaces.include,
        metrics.namespaces.exclude = ?config.metrics.namespaces.exclude,
        metrics.refresh_interval_secs = ?config.metrics.refresh_interval_secs,
        metrics.workers = config.metrics.workers,
        "kyverno-metrics starting"
    );

    let metrics_addr: SocketAddr = config.metrics_addr.parse().unwrap_or_else(|e| {
        eprintln!("Invalid metrics_addr '{}': {e}", config.metrics_addr);
        std::process::exit(1);
    });

    let client = Client::try_default().await.unwrap_or_else(|e| {
        eprintln!("Failed to create kubernetes client: {e}");
        std::process::exit(1);
    });

    let mut registry = Registry::default();
    let kyverno_metrics = Arc::new(KyvernoMetrics::new(&mut registry, config.metrics.clone()));
    let registry = Arc::new(registry);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(shutdown_signal(shutdown_tx));

    if let Some(interval) = config.metrics.refresh_interval() {
        tokio::spawn(metrics::run_periodic_refresh(
            kyverno_metrics.clone(),
            interval,
            shutdown_rx.clone(),
        ));
    } else {
        info!("skipping periodic metrics refresh, no refresh interval configured");
    }

    let sink: Arc<dyn MetricsSink> = kyverno_metrics;
    let (controller, worker) = PolicyMetricsController::new(sink, config.metrics.queue_capacity);
    let controller = Arc::new(controller);
    let worker = tokio::spawn(worker.run(config.metrics.workers));

    let cluster_synced = Arc::new(AtomicBool::new(false));
    let namespaced_synced = Arc::new(AtomicBool::new(false));

    let cluster_handler: Arc<dyn EventHandler<ClusterPolicy>> = controller.clone();
    let cluster_informer = tokio::spawn(informer::run(
        Api::<ClusterPolicy>::all(client.clone()),
        cluster_handler,
        cluster_synced.clone(),
        shutdown_rx.clone(),
    ));

    let namespaced_handler: Arc<dyn EventHandler<Policy>> = controller;
    let namespaced_informer = tokio::spawn(informer::run(
        Api::<Policy>::all(client),
        namespaced_handler,
        namespaced_synced.clone(),
        shutdown_rx.clone(),
    ));

    let health_state = Arc::new(HealthState {
        registry,
        synced: vec![cluster_synced, namespaced_synced],
    });

    let metrics_router = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics_handler))
        .with_state(health_state);

    run_http_server(metrics_addr, metrics_router, shutdown_rx).await;

    // informers hold the last controller handles; once they stop the queue closes
    // and the workers drain what is left
    for task in [cluster_informer, namespaced_informer] {
        if let Err(e) = task.await {
            error!("policy informer task failed: {e}");
        }
    }
    if let Err(e) = worker.await {
        error!("metrics worker pool failed: {e}");
    }

    info!("kyverno-metrics shut down gracefully");
}
