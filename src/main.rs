//! foldershare - command-line client for a shared folder server

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::{Color, Stylize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use foldershare::cli::{ClientCommand, ClientOpts};
use foldershare::config::{self, ClientConfig};
use foldershare::logger::NoopSink;
use foldershare::logging::init_logging;
use foldershare::model::FileEntry;
use foldershare::progress::TransferProgress;
use foldershare::Client;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    init_logging(opts.verbose)?;

    let cfg = resolve_config(&opts)?;
    let (host, port) = (cfg.host.clone(), cfg.port);
    let download_dir = cfg.download_dir.clone();

    let mut client = Client::with_config(cfg, Arc::new(NoopSink));
    if !client.connect(&host, port) {
        anyhow::bail!("could not connect to {host}:{port}");
    }

    let outcome = run(&mut client, &opts, &download_dir);
    client.disconnect();
    outcome
}

fn run(client: &mut Client, opts: &ClientOpts, download_dir: &Path) -> Result<()> {
    match &opts.command {
        ClientCommand::Ls => {
            let files = client.try_list_files()?;
            print_listing(&files);
        }
        ClientCommand::Get { name, output } => {
            let dest = output.clone().unwrap_or_else(|| download_dir.join(name));
            let mut progress = bar(opts.quiet, "Downloading", name);
            let mut report = |p: u8| progress.update(p);
            let cb: &mut dyn FnMut(u8) = &mut report;
            match client.try_download_file(name, &dest, Some(cb)) {
                Ok(bytes) => {
                    progress.finish_success(bytes);
                    println!("Saved to {}", dest.display());
                }
                Err(e) => {
                    progress.finish_error(&e.to_string());
                    return Err(e).with_context(|| format!("download {name}"));
                }
            }
        }
        ClientCommand::Put { path } => {
            let label = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let mut progress = bar(opts.quiet, "Uploading", &label);
            let mut report = |p: u8| progress.update(p);
            let cb: &mut dyn FnMut(u8) = &mut report;
            match client.try_upload_file(path, Some(cb)) {
                Ok(bytes) => progress.finish_success(bytes),
                Err(e) => {
                    progress.finish_error(&e.to_string());
                    return Err(e).with_context(|| format!("upload {}", path.display()));
                }
            }
        }
        ClientCommand::Rm { name } => {
            client
                .try_delete_file(name)
                .with_context(|| format!("delete {name}"))?;
            println!("{} {}", "Deleted".with(Color::Green).bold(), name);
        }
    }
    Ok(())
}

fn bar(quiet: bool, verb: &str, name: &str) -> TransferProgress {
    if quiet {
        TransferProgress::hidden()
    } else {
        TransferProgress::new(verb, name)
    }
}

fn print_listing(files: &[FileEntry]) {
    if files.is_empty() {
        println!("(empty)");
        return;
    }
    let width = files.iter().map(|f| f.name.chars().count()).max().unwrap_or(4).max(4);
    let header = format!("{:<width$}  {:>10}  {}", "Name", "Size", "Modified", width = width);
    println!("{}", header.bold());
    for f in files {
        println!(
            "{:<width$}  {:>10}  {}",
            f.name,
            f.formatted_size(),
            f.modified_at.format("%Y-%m-%d %H:%M"),
            width = width
        );
    }
    println!("{} files", files.len());
}

fn resolve_config(opts: &ClientOpts) -> Result<ClientConfig> {
    let path: PathBuf = opts
        .config
        .clone()
        .unwrap_or_else(|| config::config_dir().join("client.toml"));
    let mut cfg: ClientConfig = config::load(&path)?;
    if let Some(host) = &opts.host {
        cfg.host = host.clone();
    }
    if let Some(port) = opts.port {
        cfg.port = port;
    }
    Ok(cfg)
}
