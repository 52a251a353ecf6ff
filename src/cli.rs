use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatgate")]
#[command(about = "Tool-call gateway for a messaging client, with archive fallback", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Serve JSON-RPC tool calls on stdio and the local socket.
    Serve {
        /// JSON config file. Missing file means defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// SQLite archive path
        #[arg(long)]
        archive: Option<PathBuf>,
        /// IPC socket path
        #[arg(long)]
        socket: Option<PathBuf>,
        #[arg(long)]
        no_stdio: bool,
        #[arg(long)]
        no_ipc: bool,
        /// Per-call budget in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Publish an in-memory live session loaded from this JSON fixture.
        #[arg(long)]
        live_fixture: Option<PathBuf>,
    },

    /// Load archive records (JSONL, one record or bare message per line).
    Import {
        #[arg(long)]
        archive: PathBuf,
        file: PathBuf,
    },

    /// Print archive statistics as JSON.
    Stats {
        #[arg(long)]
        archive: PathBuf,
    },

    /// Print the effective configuration; with --write, save it back.
    Config {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        write: bool,
    },
}
