use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zap_realtime::config::parse_endpoint;
use zap_realtime::{ConnectionState, RealtimeConfig, RealtimeService, RealtimeSnapshot};

const ENV_LOG_LEVEL: &str = "ZAP_LOG_LEVEL";

/// Headless consumer: keeps the push connection alive and logs what the
/// dashboard would render.
#[derive(Parser, Debug)]
#[command(name = "zap-watch")]
struct Args {
    /// Push endpoint; overrides ZAP_REALTIME_URL.
    #[arg(long)]
    url: Option<String>,
    /// Organization room to join; overrides ZAP_ORGANIZATION_ID.
    #[arg(long)]
    organization_id: Option<i64>,
    #[arg(long)]
    reconnect_attempts: Option<u32>,
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = resolve_config(&args)?;
    if !config.enabled {
        warn!(event = "watch_disabled", endpoint = %config.endpoint);
        return Ok(());
    }
    info!(
        event = "watch_start",
        endpoint = %config.endpoint,
        organization_id = ?config.organization_id,
        reconnect_attempts = config.reconnect_attempts,
        reconnect_delay_ms = config.reconnect_delay.as_millis() as u64
    );

    let service = RealtimeService::start(config).await;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let outcome = watch(&service, shutdown).await;

    service.stop().await;
    info!(event = "watch_stop");
    outcome
}

/// Logs connection and state changes until `shutdown` resolves. Fails once
/// reconnection gives up, including when that happened before the first poll.
async fn watch(service: &RealtimeService, shutdown: impl Future<Output = ()>) -> Result<()> {
    let mut connection = service.watch_connection();
    let mut snapshots = service.state().subscribe();
    tokio::pin!(shutdown);

    let initial = connection.borrow_and_update().clone();
    log_connection(&initial);
    gave_up(&initial)?;

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            changed = connection.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = connection.borrow_and_update().clone();
                log_connection(&state);
                gave_up(&state)?;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log_snapshot(&snapshot);
            }
        }
    }
}

fn gave_up(state: &ConnectionState) -> Result<()> {
    if state.is_persistent_failure() {
        anyhow::bail!(
            "gave up after {} attempts: {}",
            state.failed_attempts,
            state.last_error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn resolve_config(args: &Args) -> Result<RealtimeConfig> {
    let mut config = RealtimeConfig::from_env().context("reading realtime configuration")?;
    if let Some(url) = args.url.as_deref() {
        config.endpoint = parse_endpoint(url).with_context(|| format!("parsing --url {url}"))?;
    }
    if let Some(organization_id) = args.organization_id {
        config = config.with_organization(organization_id);
    }
    let attempts = args.reconnect_attempts.unwrap_or(config.reconnect_attempts);
    let delay = args
        .reconnect_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(config.reconnect_delay);
    Ok(config.with_reconnect(attempts, delay))
}

fn log_connection(state: &ConnectionState) {
    match state.last_error.as_deref() {
        Some(error) => warn!(
            event = "watch_connection",
            status = %state.status,
            failed_attempts = state.failed_attempts,
            error = error
        ),
        None => info!(event = "watch_connection", status = %state.status),
    }
}

fn log_snapshot(snapshot: &RealtimeSnapshot) {
    info!(
        event = "watch_state",
        campaigns = snapshot.campaign_statuses.len(),
        campaigns_running = snapshot.running_campaigns(),
        campaign_logs = snapshot.campaign_logs.len(),
        execution_logs = snapshot.execution_logs.len(),
        sessions = snapshot.bot_health.len(),
        notifications = snapshot.notifications.len()
    );
    if let Some(latest) = snapshot.notifications.head() {
        info!(
            event = "watch_notification",
            id = %latest.id,
            kind = %latest.item.kind,
            message = %latest.item.message
        );
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            std::env::var(ENV_LOG_LEVEL)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .and_then(|value| EnvFilter::try_new(value.trim()).ok())
        })
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exhaustion_before_watching_still_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let config = RealtimeConfig::new(
            parse_endpoint(&format!("ws://{addr}/ws")).expect("endpoint"),
        )
        .with_reconnect(1, Duration::from_millis(10));
        let service = RealtimeService::start(config).await;
        let mut states = service.watch_connection();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(ConnectionState::is_persistent_failure),
        )
        .await
        .expect("gave up in time")
        .expect("state channel open");

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            watch(&service, std::future::pending()),
        )
        .await
        .expect("watch returns without a further state change");
        let err = outcome.expect_err("exhaustion is reported");
        assert!(err.to_string().contains("gave up after 1 attempts"));

        service.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watch_returns_on_shutdown() {
        let service = RealtimeService::new();
        let outcome = watch(&service, async {}).await;
        assert!(outcome.is_ok());
    }
}
