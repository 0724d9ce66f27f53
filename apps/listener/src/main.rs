use std::{io, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use listener_core::ConnectionController;
use realtime_transport::RealtimeTransport;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod host;
mod render;

use commands::{request_quit, spawn_stdin_reader, COMMAND_QUEUE_CAPACITY};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Watch row-level database changes from a Realtime websocket endpoint.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "listener.toml")]
    config: PathBuf,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    channel: Option<String>,
    #[arg(long)]
    schema: Option<String>,
    #[arg(long)]
    table: Option<String>,
    #[arg(long)]
    event: Option<String>,
    /// Subscribe immediately instead of waiting for a start command.
    #[arg(long)]
    autostart: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config)?;
    if let Some(v) = args.url {
        settings.realtime_url = Some(v);
    }
    if let Some(v) = args.api_key {
        settings.api_key = Some(v);
    }
    if let Some(v) = args.channel {
        settings.channel = v;
    }
    if let Some(v) = args.schema {
        settings.schema = v;
    }
    if let Some(v) = args.table {
        settings.table = v;
    }
    if let Some(v) = args.event {
        settings.event = v;
    }
    settings.autostart |= args.autostart;

    let realtime = settings.realtime_settings()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build transport runtime")?;

    let transport = RealtimeTransport::new(realtime, runtime.handle().clone());
    let endpoint = transport.endpoint()?;
    info!(host = endpoint.host_str().unwrap_or_default(), "listener: configured");
    let mut controller = ConnectionController::with_filter(transport, settings.change_filter());

    let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_CAPACITY);
    spawn_stdin_reader(cmd_tx.clone());
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tokio::task::spawn_blocking(move || request_quit(&cmd_tx)).await;
        }
    });

    let stdout = io::stdout();
    let result = host::run_listener(&mut controller, &cmd_rx, &mut stdout.lock(), settings.autostart);

    // Releasing here queues the channel leave while the runtime can still
    // deliver it.
    drop(controller);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}
