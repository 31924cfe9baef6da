// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use clap::Parser;
use tracing::error;

use vibetunnel_server::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    if let Err(e) = vibetunnel_server::run::run(config).await {
        error!("fatal: {e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
