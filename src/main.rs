//! Traffic relay
//!
//! Subscribes to the sensor producers and republishes their events on a
//! single endpoint until Ctrl-C / SIGTERM.
//!
//! Run with: cargo run -- --mode fan-in --config config/city_config.json

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use traffic_relay::{Relay, RelayConfig, RelayMode, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "traffic-relay")]
#[command(version, about = "Fan-in relay for traffic sensor events")]
struct Args {
    /// Relay strategy: sequential (single thread) or fan-in (thread per producer).
    #[arg(long, env = "BROKER_MODE", default_value = "sequential")]
    mode: RelayMode,

    /// City config JSON providing producer and relay ports.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the endpoint the relay publishes on.
    #[arg(long)]
    bind: Option<String>,

    /// Poll timeout in milliseconds; bounds shutdown latency.
    #[arg(long, default_value_t = 1000)]
    poll_timeout_ms: u64,

    /// Output logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %args.mode,
        bind = %config.bind_addr,
        producers = config.producers.len(),
        "Starting traffic-relay"
    );

    let teardown = config.teardown_timeout();
    let shutdown = Shutdown::new();
    let relay = Relay::new(args.mode, config, shutdown.clone());

    // Detached from the runtime: exit never waits on an overrunning relay
    let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("relay".into())
        .spawn(move || {
            let _ = done_tx.send(relay.run());
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "Failed to start relay thread");
        return ExitCode::FAILURE;
    }

    let result = tokio::select! {
        done = &mut done_rx => done,
        signal = shutdown.wait_for_signal() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                shutdown.request_stop();
            }
            match tokio::time::timeout(teardown, done_rx).await {
                Ok(done) => done,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = teardown.as_millis() as u64,
                        "Relay did not stop in time, abandoning it"
                    );
                    return ExitCode::SUCCESS;
                }
            }
        }
    };

    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
        Err(_) => {
            tracing::error!("Relay thread panicked");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "traffic_relay=info".into()),
    );
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_config(args: &Args) -> traffic_relay::Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config = config.bind(bind.clone());
    }
    config = config.poll_timeout(Duration::from_millis(args.poll_timeout_ms));
    config.validate()?;
    Ok(config)
}
