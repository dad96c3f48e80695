mod relay;

use anyhow::{bail, Context, Result};
use clap::Parser;
use relay::{HubConfig, HubState};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:3001";

#[derive(Parser, Debug)]
#[command(name = "zap-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 10)]
    ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();
    init_logging(&config);
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid --addr {}", config.addr))?;
    if !addr.ip().is_loopback() {
        bail!("refusing to bind non-loopback address {addr}");
    }

    let hub = Arc::new(HubState::new(config.clone()));
    let app = relay::router(hub);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(event = "hub_start", addr = %addr, debug = config.debug);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("serving hub")?;

    info!(event = "hub_stop");
    Ok(())
}

fn load_config() -> HubConfig {
    let args = Args::parse();
    let addr = if args.addr.trim().is_empty() {
        std::env::var("ZAP_HUB_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
    } else {
        args.addr.clone()
    };
    HubConfig {
        addr,
        debug: args.debug || env_true("ZAP_HUB_DEBUG"),
        ping_interval: Duration::from_secs(args.ping_interval),
        write_timeout: Duration::from_secs(args.write_timeout),
    }
}

fn init_logging(config: &HubConfig) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("ZAP_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
