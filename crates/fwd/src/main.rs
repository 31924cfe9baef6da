// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use vibetunnel_fwd::config::Config;
use vibetunnel_fwd::run;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
    init_tracing(&config);

    if let Some(ref title) = config.update_title {
        match run::update_title(&config, title) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        }
    }

    match run::run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Log to a file so the interactive terminal stays clean.
fn init_tracing(config: &Config) {
    let level = config.effective_log_level();
    if level == "off" {
        return;
    }
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let path = config.log_file();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .try_init();
}
