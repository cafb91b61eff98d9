use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::controller::config::{Config, CONFIG_FILE};
use crate::controller::Controller;
use crate::echonet::client::EchonetClient;

mod controller;
mod echonet;

#[derive(Parser)]
#[command(name = "eibs7-controller")]
#[command(about = "Self-consumption controller for an EIBS7 battery over ECHONET Lite")]
struct Args {
    /// Number of monitoring cycles to run; -1 runs until interrupted.
    #[arg(long = "loop", default_value_t = -1)]
    loop_count: i64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load(Path::new(CONFIG_FILE)) {
        Ok(config) => config,
        Err(e) => {
            error!(file = CONFIG_FILE, error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(file = CONFIG_FILE, "configuration loaded");
    config.log_summary();

    let interval_secs = config.monitor_interval_seconds as u64;

    // The signal watcher sets the flag; the loop and the controller check it
    // between transactions only, so an in-flight exchange always completes.
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        let wake = wake.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.store(true, Ordering::Relaxed);
                wake.notify_one();
            }
        });
    }

    let mut controller = match Controller::new(config, shutdown.clone()) {
        Ok(controller) => controller,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = EchonetClient::probe_port().await {
        error!(error = %e, "cannot start monitoring");
        return ExitCode::FAILURE;
    }

    info!(interval_secs, loop_count = args.loop_count, "monitoring started");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cycles: i64 = 0;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if args.loop_count >= 0 && cycles >= args.loop_count {
            info!(cycles, "configured loop count reached");
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => break,
        }
        controller.run_cycle().await;
        cycles += 1;
    }

    info!(cycles, "controller stopped");
    ExitCode::SUCCESS
}
