use std::sync::atomic::Ordering;

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gnat::config::{AnalyzerVariant, GnatConfig};
use gnat::egress::{run_egress, DroneClient};
use gnat::http::{router, AppState};
use gnat::pipeline::{PipelineShared, VisionPipeline};
use gnat::source::TcpSource;
use gnat_autopilot::AutopilotController;

/// Monocular vision navigation pipeline for small drones.
#[derive(Debug, Parser)]
#[command(name = "gnat", version)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Address of the framed H.264 stream.
    #[arg(long, env = "GNAT_STREAM_ADDR")]
    stream_addr: Option<String>,
    /// Listen address for the HTTP surface.
    #[arg(long, env = "GNAT_HTTP_ADDR")]
    http_addr: Option<String>,
    /// Base URL of the drone command endpoint.
    #[arg(long, env = "GNAT_DRONE_API")]
    drone_api: Option<String>,
    /// Obstacle analyzer variant: sparse or dense.
    #[arg(long)]
    analyzer: Option<String>,
}

fn init_tracing() {
    let evt_fmt = fmt::format()
        .with_timer(fmt::time::Uptime::default())
        .compact();
    tracing_subscriber::registry()
        .with(fmt::layer().event_format(evt_fmt))
        .with(EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GnatConfig::from_file(path)
            .wrap_err_with(|| format!("loading config {}", path.display()))?,
        None => GnatConfig::default(),
    };
    if let Some(addr) = cli.stream_addr {
        config.stream_addr = addr;
    }
    if let Some(addr) = cli.http_addr {
        config.http_addr = addr;
    }
    if let Some(api) = cli.drone_api {
        config.drone_api = api;
    }
    if let Some(variant) = cli.analyzer.as_deref() {
        config.analyzer = match variant {
            "sparse" => AnalyzerVariant::Sparse,
            "dense" => AnalyzerVariant::Dense,
            other => eyre::bail!("unknown analyzer variant: {other}"),
        };
    }

    let shared = PipelineShared::new(AutopilotController::new(config.autopilot.clone()));
    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();

    // Egress task: posts discrete tokens to the drone endpoint.
    let drone = DroneClient::new(&config.drone_api);
    tokio::spawn(run_egress(command_rx, drone, shared.autopilot.clone()));

    // Receiver thread: stream -> demux -> decode -> analysis -> mailbox.
    let receiver = {
        let shared = shared.clone();
        let config = config.clone();
        let command_tx = command_tx.clone();
        std::thread::Builder::new()
            .name("gnat-receiver".to_string())
            .spawn(move || {
                let stream_addr = config.stream_addr.clone();
                let mut pipeline = VisionPipeline::new(config, shared.clone(), Some(command_tx));
                let source = match TcpSource::connect(&stream_addr) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("{e}");
                        shared.running.store(false, Ordering::Relaxed);
                        return;
                    }
                };
                if let Err(e) = pipeline.run(source) {
                    tracing::error!("pipeline stopped: {e}");
                }
                shared.running.store(false, Ordering::Relaxed);
            })
            .wrap_err("spawning receiver thread")?
    };

    // HTTP surface.
    let state = AppState {
        shared: shared.clone(),
        command_tx: Some(command_tx),
    };
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .wrap_err_with(|| format!("binding {}", config.http_addr))?;
    tracing::info!("HTTP surface on http://{}", config.http_addr);

    let running = shared.running.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            running.store(false, Ordering::Relaxed);
        })
        .await
        .wrap_err("HTTP server failed")?;

    shared.running.store(false, Ordering::Relaxed);
    let _ = receiver.join();
    Ok(())
}
