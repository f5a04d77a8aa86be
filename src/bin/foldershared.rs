use anyhow::{Context, Result};
use clap::Parser;
use std::sync::{mpsc, Arc};
use tracing::info;

use foldershare::cli::DaemonOpts;
use foldershare::config::{self, ServerConfig};
use foldershare::logger::{ConsoleSink, EventSink, Tee, TextLogger};
use foldershare::logging::init_logging;
use foldershare::Server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_logging(opts.verbose)?;

    let cfg = resolve_config(&opts)?;
    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(ConsoleSink::default())];
    if let Some(path) = &cfg.log_file {
        let log = TextLogger::new(path).with_context(|| format!("open log file {}", path.display()))?;
        sinks.push(Box::new(log));
    }

    let mut server = Server::new(cfg, Arc::new(Tee(sinks)))?;
    server.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    println!("Press Ctrl-C to stop");
    let _ = rx.recv();
    info!(clients = server.client_count(), "shutting down");
    server.stop();
    Ok(())
}

fn resolve_config(opts: &DaemonOpts) -> Result<ServerConfig> {
    let path = opts
        .config
        .clone()
        .unwrap_or_else(|| config::config_dir().join("server.toml"));
    let mut cfg: ServerConfig = config::load(&path)?;
    if let Some(port) = opts.port {
        cfg.port = port;
    }
    if let Some(bind) = &opts.bind {
        cfg.bind = bind.clone();
    }
    if let Some(folder) = &opts.folder {
        cfg.shared_folder = folder.clone();
    }
    if let Some(log_file) = &opts.log_file {
        cfg.log_file = Some(log_file.clone());
    }
    if opts.timeout_ms.is_some() {
        cfg.io_timeout_ms = opts.timeout_ms;
    }
    Ok(cfg)
}
