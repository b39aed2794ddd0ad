//! CLI entry point for the car state reconciler.
//!
//! `run` subscribes to the telemetry broker and persists reconciled
//! vehicle state on a fixed cadence; `replay` pushes a recorded telemetry
//! file through the same pipeline and flushes once.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use car_state_reconciler::config::{Cli, Commands, ReconcileOpts};
use car_state_reconciler::flush::{flush_once, run_flush_loop};
use car_state_reconciler::reconcile::Reconciler;
use car_state_reconciler::state::StateTable;
use car_state_reconciler::store::{CsvStateStore, StateStore};
use car_state_reconciler::transport::run_mqtt_ingest;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/car_state_reconciler.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("car_state_reconciler.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { broker_url, opts } => run(&broker_url, opts).await?,
        Commands::Replay { input, opts } => replay(&input, opts).await?,
    }

    Ok(())
}

/// Wires the live pipeline: MQTT ingest task + periodic flush task, torn
/// down together on Ctrl+C.
async fn run(broker_url: &str, opts: ReconcileOpts) -> Result<()> {
    let table = Arc::new(StateTable::new());
    let store: Arc<dyn StateStore> = Arc::new(CsvStateStore::new(&opts.output));
    let reconciler = Arc::new(Reconciler::new(
        table.clone(),
        opts.car_id,
        opts.required_cells,
    ));

    info!(
        car_id = opts.car_id,
        required_cells = opts.required_cells,
        flush_interval_secs = opts.flush_interval_secs,
        output = %opts.output,
        "starting reconciler"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let flush_task = tokio::spawn(run_flush_loop(
        table.clone(),
        store.clone(),
        opts.flush_config(),
        shutdown_rx.clone(),
    ));

    let broker = broker_url.to_string();
    let ingest_task = tokio::spawn(async move {
        if let Err(e) = run_mqtt_ingest(&broker, reconciler, shutdown_rx).await {
            warn!(error = %e, "ingest task ended with error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true)?;

    let _ = flush_task.await;
    let _ = ingest_task.await;

    Ok(())
}

/// Feeds a `topic<TAB>payload` file through the reconciler, then flushes
/// whatever reached completeness.
async fn replay(input: &str, opts: ReconcileOpts) -> Result<()> {
    let table = Arc::new(StateTable::new());
    let store: Arc<dyn StateStore> = Arc::new(CsvStateStore::new(&opts.output));
    let reconciler = Reconciler::new(table.clone(), opts.car_id, opts.required_cells);

    let content = std::fs::read_to_string(input)?;
    let mut applied = 0usize;

    for (lineno, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let Some((topic, payload)) = line.split_once('\t') else {
            warn!(line = lineno + 1, "no tab separator, skipping record");
            continue;
        };
        match reconciler.handle_message(topic, payload.as_bytes()).await {
            Ok(_) => applied += 1,
            Err(e) => warn!(line = lineno + 1, error = %e, "dropped record"),
        }
    }

    let written = flush_once(&table, store, &opts.flush_config()).await;
    info!(applied, written, output = %opts.output, "replay complete");

    Ok(())
}
