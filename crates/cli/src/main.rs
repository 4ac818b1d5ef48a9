// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `runicorn`: a minimal operator binary wiring the library crates
//! together for manual exercising. argument
//! parsing depth is explicitly out of scope — this
//! stays to three subcommands with no business logic of their own.

mod commands;
mod exit_error;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use runicorn_core::StorageRoot;

use commands::sync_once::SyncOnceArgs;
use exit_error::ExitError;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "runicorn", version, about = "Local-first experiment tracking storage tools")]
struct Cli {
    /// Storage root; defaults to `$RUNICORN_HOME` or the platform data dir.
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[arg(long, value_enum, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run init/log/finish against a real storage root.
    RunDemo {
        /// Hierarchical run path, e.g. `vision/demo`.
        #[arg(long, default_value = "demo/run")]
        path: String,
    },
    /// Run/blob/index counts for a storage root.
    StorageStats,
    /// Run one manifest-driven sync cycle against a remote.
    SyncOnce(SyncOnceArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let root = StorageRoot::resolve(cli.storage_root);
    tracing::info!(root = %root.root().display(), "runicorn cli starting");

    let result = match cli.command {
        Command::RunDemo { path } => commands::run_demo::handle(&root, cli.format, &path),
        Command::StorageStats => commands::storage_stats::handle(&root, cli.format),
        Command::SyncOnce(args) => commands::sync_once::handle(&root, cli.format, args),
    };

    if let Err(err) = result {
        run_exit(err);
    }
}

fn run_exit(err: ExitError) -> ! {
    eprintln!("error: {err}");
    std::process::exit(err.code);
}
