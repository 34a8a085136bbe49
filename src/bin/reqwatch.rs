//! reqwatch daemon.
//!
//! Loads (or creates) the monitor document, wires the HTTP tracker and
//! workflow adapters, serves the control plane and runs the poll loop until
//! Ctrl-C.

use anyhow::Context;
use clap::Parser;
use reqwatch::api::ControlServer;
use reqwatch::monitor::MonitorBuilder;
use reqwatch::persist::default_document_path;
use reqwatch::tracker::http::DEFAULT_TIMEOUT_SECS;
use reqwatch::tracker::{HttpExtractionWorkflow, HttpRequirementTracker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Change-aware requirement monitor.
#[derive(Parser)]
#[command(name = "reqwatch", version, about)]
struct Cli {
    /// Monitor document (config + monitored ids). Defaults to the
    /// platform config directory.
    #[arg(short, long, env = "REQWATCH_DOCUMENT")]
    document: Option<PathBuf>,

    /// Control-plane listen address.
    #[arg(long, env = "REQWATCH_BIND", default_value = "127.0.0.1:8787")]
    bind: String,

    /// Base URL of the requirement tracker adapter.
    #[arg(long, env = "REQWATCH_TRACKER_URL")]
    tracker_url: String,

    /// Bearer token for the tracker.
    #[arg(long, env = "REQWATCH_TRACKER_TOKEN", hide_env_values = true)]
    tracker_token: Option<String>,

    /// Base URL of the extraction workflow.
    #[arg(long, env = "REQWATCH_WORKFLOW_URL")]
    workflow_url: String,

    /// Per-request timeout for both adapters, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    http_timeout_secs: u64,

    /// Item ids to add on startup (repeatable).
    #[arg(long = "item")]
    items: Vec<String>,

    /// Serve the control plane without starting the poll loop.
    #[arg(long)]
    paused: bool,

    /// Also write logs to a daily-rolling file in this directory.
    #[arg(long, env = "REQWATCH_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reqwatch=info"));
    let (file_layer, _guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "reqwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    let document = cli
        .document
        .or_else(default_document_path)
        .context("cannot determine a monitor document path; pass --document")?;

    let timeout = Duration::from_secs(cli.http_timeout_secs);
    let tracker = HttpRequirementTracker::new(&cli.tracker_url, cli.tracker_token, timeout)?;
    let workflow = HttpExtractionWorkflow::new(&cli.workflow_url, timeout)?;

    let monitor =
        MonitorBuilder::from_document_path(document, Arc::new(tracker), Arc::new(workflow))?
            .build();

    for id in &cli.items {
        match monitor.add_item(id) {
            Ok(true) => info!(item_id = %id, "monitoring item"),
            Ok(false) => {}
            Err(e) => warn!(item_id = %id, "cannot add item: {e}"),
        }
    }

    let server = ControlServer::start(monitor.clone(), &cli.bind).await?;

    if cli.paused {
        info!("poll loop paused; start it via POST /api/monitor/start");
    } else {
        monitor.start()?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    info!("shutdown requested");

    if monitor.run_state() == reqwatch::RunState::Running
        && let Err(e) = monitor.stop().await
    {
        warn!("monitor did not stop cleanly: {e}");
    }
    server.shutdown();

    info!("reqwatch shut down cleanly");
    Ok(())
}
