use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use client_core::{CommandSink, ConnectionManager, QueuePolicy};
use state_sync::Dispatcher;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod panels;

use config::load_settings;
use console::Console;
use panels::{ExtruderPanel, StatusLog};

#[derive(Parser, Debug)]
struct Args {
    /// TOML settings file; defaults to ./touchpanel.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Daemon websocket URL, e.g. ws://printer.local:7125/websocket.
    #[arg(long)]
    url: Option<String>,
    /// Queue commands issued while reconnecting instead of rejecting them.
    #[arg(long)]
    queue_commands: bool,
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(url) = args.url {
        settings.daemon_url = url;
    }
    if args.queue_commands {
        settings.queue_policy = QueuePolicy::QueueAndFlush;
    }
    if let Some(filter) = args.log_filter {
        settings.log_filter = filter;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dispatcher = Dispatcher::shared();
    let connection = ConnectionManager::new(settings.connection_settings(), Arc::clone(&dispatcher))?;

    let extruder = ExtruderPanel::attach(
        Arc::clone(&dispatcher),
        Arc::clone(&connection) as Arc<dyn CommandSink>,
        &settings.status_root,
    )?;
    let status_log = Arc::new(StatusLog::new(&settings.status_root)?);
    let status_log_token = dispatcher.register(&status_log);

    let session = connection.start()?;
    info!(url = %connection.url(), queue_policy = ?settings.queue_policy, "touchpanel started");
    extruder.foreground();

    let console = Console {
        connection: Arc::clone(&connection),
        extruder: Arc::clone(&extruder),
    };
    console::run(tokio::io::BufReader::new(tokio::io::stdin()), &console).await?;

    connection.shutdown();
    session.await?;

    extruder.detach();
    dispatcher.unregister(status_log_token);
    info!(
        cycles = dispatcher.cycles(),
        objects = ?status_log.updates(),
        "touchpanel stopped"
    );
    Ok(())
}
