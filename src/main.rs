// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for mounting a remote HTML directory index.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for mounting a remote HTML directory index.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indexfs::{mount, HttpBackend, HttpOptions, IndexFs, RemotePath};
use log::LevelFilter;

#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Mount an HTML directory listing via FUSE")]
struct Cli {
    /// Listing URL to mount, e.g. http://mirror.example.org/pub/.
    url: String,

    /// Mount point on the host filesystem.
    mountpoint: PathBuf,

    /// Comma-separated mount options passed through to FUSE.
    #[arg(short, long, default_value = "")]
    options: String,

    /// Request timeout in seconds.
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Custom User-Agent header.
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Detach and run in the background after mounting.
    #[arg(short, long)]
    daemon: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    let root = RemotePath::parse(&cli.url)
        .with_context(|| format!("parse listing url {}", cli.url))?;
    let backend = HttpBackend::new(HttpOptions {
        timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
        user_agent: cli.user_agent.clone(),
    });
    let fs = IndexFs::new(backend, root);

    if cli.daemon {
        daemonize::Daemonize::new()
            .working_directory("/")
            .start()
            .context("daemonize")?;
    }
    mount::mount(fs, &cli.mountpoint, &cli.options)
}
