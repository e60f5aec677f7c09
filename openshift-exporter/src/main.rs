//! Prometheus exporter for OpenShift resources.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use openshift_exporter::scheduler::wait_for_signal;
use openshift_exporter::{ExporterConfig, HttpServer, IdleLoop, SnapshotCollector};
use openshift_exporter_common::init_tracing;

/// Prometheus exporter for OpenShift resources.
#[derive(Parser, Debug)]
#[command(name = "openshift-exporter")]
#[command(about = "Export OpenShift resource timestamps and versions as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Metrics port (overrides config and LISTEN_PORT).
    #[arg(long)]
    listen_port: Option<u16>,

    /// Log level (overrides config and LOG_LEVEL).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // File, then environment, then CLI; validated once all layers apply
    let mut config = match &args.config {
        Some(path) => {
            let mut config = ExporterConfig::load_from_file(path)?;
            config.apply_env(|name| std::env::var(name).ok())?;
            config
        }
        None => ExporterConfig::from_env()?,
    };
    if let Some(port) = args.listen_port {
        config.http.listen_port = port;
    }
    if let Some(level) = &args.log_level {
        config.logging.set_level(level);
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    info!(
        name = %config.name,
        url = %config.api.url,
        tasks = ?config.collection.tasks,
        timeout = ?config.request_timeout(),
        "Starting OpenShift exporter"
    );

    let collector = Arc::new(SnapshotCollector::from_config(&config)?);
    for task in collector.tasks() {
        if let Some(fixture) = &task.fixture {
            info!(task = task.name(), fixture = %fixture.display(), "Task runs in test mode");
        }
    }

    let listen_addr = config.listen_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(collector.clone(), listen_addr, config.http.path.clone());
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx.clone()));
    let idle_task = tokio::spawn(IdleLoop::new(config.idle_interval()).run(shutdown_rx));

    // A server that cannot bind or dies early ends the process
    let server_result = tokio::select! {
        _ = wait_for_signal() => None,
        result = &mut http_task => Some(result),
    };

    shutdown_tx.send(true)?;

    if let Some(result) = server_result {
        let _ = idle_task.await;
        return match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "HTTP server failed");
                Err(e)
            }
            Err(e) => Err(e.into()),
        };
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        if let Ok(Err(e)) = http_task.await {
            error!(error = %e, "HTTP server error");
        }
        let _ = idle_task.await;
    })
    .await;

    let health = collector.health();
    info!(
        up = health.up(),
        errors = health.errors(),
        http_code = health.http_code(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}
