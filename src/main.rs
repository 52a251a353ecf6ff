mod cli;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use chatgate::archive::{ArchiveStore, PutOutcome};
use chatgate::types::{ArchiveRecord, Message, Provenance};
use chatgate::{load_config, save_config, Gateway, GatewayConfig, MemoryHost};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn init_tracing() {
    // stdout carries protocol frames; diagnostics go to stderr.
    let filter = std::env::var("CHATGATE_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            archive,
            socket,
            no_stdio,
            no_ipc,
            timeout_ms,
            live_fixture,
        } => {
            let mut cfg = match &config {
                Some(path) => load_config(path)?,
                None => GatewayConfig::default(),
            };
            cfg.apply_env();
            if let Some(path) = archive {
                cfg.archive_path = path;
            }
            if let Some(path) = socket {
                cfg.ipc_socket = Some(path);
            }
            if let Some(ms) = timeout_ms {
                cfg.tool_timeout_ms = ms;
            }
            cfg.stdio &= !no_stdio;
            cfg.ipc &= !no_ipc;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(serve(cfg, live_fixture.as_deref()))
        }

        Command::Import { archive, file } => {
            let store = ArchiveStore::open_or_create(&archive, true)?;
            let report = import_jsonl(&store, &file)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Command::Stats { archive } => {
            if !archive.exists() {
                return Err(format!("archive not found: {}", archive.display()).into());
            }
            let store = ArchiveStore::open_or_create(&archive, false)?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
            Ok(())
        }

        Command::Config { config, write } => {
            let mut cfg = load_config(&config)?;
            cfg.apply_env();
            if write {
                save_config(&config, &cfg)?;
                eprintln!("Wrote {}", config.display());
            }
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
    }
}

async fn serve(
    cfg: GatewayConfig,
    live_fixture: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = Arc::new(Gateway::new(cfg)?);

    if let Some(path) = live_fixture {
        let host = MemoryHost::from_fixture(path)?;
        let generation = gateway.publish(Arc::new(host));
        info!(fixture = %path.display(), generation, "live fixture published");
    }

    let stopper = gateway.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            stopper.shutdown();
        }
    });

    let result = gateway.run().await;
    gateway.close();
    result.map_err(Into::into)
}

#[derive(Debug, Default, Serialize)]
struct ImportReport {
    inserted: usize,
    updated: usize,
    duplicates: usize,
    skipped: usize,
}

/// Each line is an archive record, or a bare message stored as a snapshot.
fn import_jsonl(store: &ArchiveStore, path: &Path) -> Result<ImportReport, Box<dyn std::error::Error>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut report = ImportReport::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = match serde_json::from_str::<ArchiveRecord>(&line) {
            Ok(record) => record,
            Err(_) => match serde_json::from_str::<Message>(&line) {
                Ok(message) => ArchiveRecord::message(message, Provenance::Snapshot),
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "skipping unreadable line");
                    report.skipped += 1;
                    continue;
                }
            },
        };
        match store.put(&record)? {
            PutOutcome::Inserted => report.inserted += 1,
            PutOutcome::Updated => report.updated += 1,
            PutOutcome::Duplicate => report.duplicates += 1,
        }
    }
    Ok(report)
}
