// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// druckwerkd — the scheduler daemon.
//
// Entry point. Loads cups-files.conf/cupsd.conf, opens the store and the
// spool, loads the MIME database, registers the delivery backends, and
// runs the scheduler loop until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use druckwerk_backend::BackendRegistry;
use druckwerk_backend::dnssd::DnssdBackend;
use druckwerk_backend::file::FileBackend;
use druckwerk_backend::ipp::IppBackend;
use druckwerk_backend::lpd::LpdBackend;
use druckwerk_backend::snmp::SnmpBackend;
use druckwerk_backend::socket::SocketBackend;
use druckwerk_backend::usb::UsbBackend;
use druckwerk_core::ServerConfig;
use druckwerk_core::logging::{LogConfig, LogManager};
use druckwerk_mime::MimeDatabase;
use druckwerk_scheduler::{Scheduler, SchedulerHandles};
use druckwerk_store::{Spool, Store};

#[derive(Debug, Parser)]
#[command(name = "druckwerkd", version, about = "Druckwerk print scheduler")]
struct Cli {
    /// Directory holding cups-files.conf and cupsd.conf.
    #[arg(short = 'c', long = "config-dir", default_value = "/etc/cups")]
    config_dir: PathBuf,

    /// Override the job database path (defaults to the spool directory).
    #[arg(long = "database")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(
        &cli.config_dir.join("cups-files.conf"),
        &cli.config_dir.join("cupsd.conf"),
    )
    .context("loading configuration")?;
    info!(config_dir = %cli.config_dir.display(), "druckwerkd starting");

    let db_path = cli
        .database
        .unwrap_or_else(|| config.request_root.join("druckwerk.db"));
    let store = Arc::new(Store::open(&db_path).context("opening job database")?);
    let spool = Arc::new(
        Spool::new(&config.request_root, &config.output_root).context("preparing spool")?,
    );
    let mime = Arc::new(MimeDatabase::load_dirs(&config.mime_dirs()).context("loading MIME data")?);
    let logs = Arc::new(LogManager::new(LogConfig::new(
        &config.server_root.join("log"),
        &config.page_log_format,
    )));

    let registry = Arc::new(BackendRegistry::new());
    registry.register(Arc::new(SocketBackend::new()));
    registry.register(Arc::new(LpdBackend::new()));
    registry.register(Arc::new(IppBackend::new()));
    registry.register(Arc::new(FileBackend::new()));
    registry.register(Arc::new(UsbBackend::new()));
    registry.register(Arc::new(SnmpBackend::new()));
    registry.register(Arc::new(DnssdBackend::new(&registry)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = Scheduler::new(SchedulerHandles {
        store,
        spool,
        mime,
        registry,
        config: Arc::new(config),
        logs,
    });
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    info!("interrupt received, shutting down");
    let _ = shutdown_tx.send(true);
    scheduler_task.await.context("scheduler task")?;

    Ok(())
}
