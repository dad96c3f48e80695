//! Push connection to the campaign backend.
//!
//! One worker task per [`RealtimeConnection::connect`] call owns the socket,
//! reads frames in arrival order and hands each one to the [`EventRouter`]
//! before reading the next. Outbound frames go through a bounded queue to a
//! separate writer task, so a peer that stops reading never stalls dispatch.
//! Reconnection uses a fixed delay and a bounded number of consecutive failed
//! attempts.

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::router::EventRouter;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};
use zap_core::events::{OrganizationRoom, JOIN_ORGANIZATION, LEAVE_ORGANIZATION};
use zap_core::wire::{decode_frame, encode_frame, Frame, FrameError, DEFAULT_MAX_FRAME_BYTES};

const CLOSE_GRACE: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
/// Outbound frames queued per session before `send` starts dropping.
pub const OUTBOUND_QUEUE: usize = 256;
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// A session counts as healthy once a frame arrives or it stays up this long.
pub const STABLE_SESSION: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    /// Consecutive failed attempts in the current streak. A session that drops
    /// before it became healthy counts as a failed attempt.
    pub failed_attempts: u32,
    /// Set once the attempt budget is spent; cleared only by a new `connect`.
    pub retries_exhausted: bool,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_persistent_failure(&self) -> bool {
        self.status == ConnectionStatus::Errored && self.retries_exhausted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the live socket. Delivery is still not guaranteed.
    Sent,
    /// Dropped because no session is connected.
    NotConnected,
    /// Dropped because the session's outbound queue is full.
    Dropped,
    /// Dropped because the payload could not be framed.
    Rejected,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    outbound: StdMutex<Option<mpsc::Sender<Message>>>,
}

impl Shared {
    fn update(&self, apply: impl FnOnce(&mut ConnectionState)) {
        self.state.send_modify(apply);
    }

    fn attach(&self, tx: mpsc::Sender<Message>) {
        *self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
    }

    fn detach(&self) {
        *self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

struct Session {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Session {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let mut task = self.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!(event = "realtime_shutdown_timeout");
            task.abort();
            let _ = task.await;
        }
    }
}

pub struct RealtimeConnection {
    router: Arc<EventRouter>,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl RealtimeConnection {
    pub fn new(router: Arc<EventRouter>) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            router,
            shared: Arc::new(Shared {
                state,
                outbound: StdMutex::new(None),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Replaces any running session with one for `config`. A disabled config
    /// leaves the connection inert in `disconnected`.
    pub async fn connect(&self, config: RealtimeConfig) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            previous.stop().await;
        }
        self.shared.detach();

        if !config.enabled {
            info!(event = "realtime_disabled", endpoint = %config.endpoint);
            self.shared.state.send_replace(ConnectionState::default());
            return;
        }

        self.shared.state.send_replace(ConnectionState {
            status: ConnectionStatus::Connecting,
            ..ConnectionState::default()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            config,
            router: self.router.clone(),
            shared: self.shared.clone(),
        };
        let task = tokio::spawn(worker.run(shutdown_rx));
        *session = Some(Session {
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Closes the socket and stops reconnecting. No handler runs after this
    /// returns.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            previous.stop().await;
            info!(event = "realtime_stopped");
        }
        self.shared.detach();
        self.shared.state.send_replace(ConnectionState::default());
    }

    /// Fire-and-forget send. Never waits on the socket and never queues for a
    /// later session.
    pub fn send<T: Serialize + ?Sized>(&self, event_type: &str, payload: &T) -> SendOutcome {
        let status = self.shared.state.borrow().status;
        if status != ConnectionStatus::Connected {
            warn!(
                event = "realtime_send_dropped",
                event_type = event_type,
                status = %status
            );
            return SendOutcome::NotConnected;
        }

        let message = match outbound_message(event_type, payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(event = "realtime_send_rejected", event_type = event_type, error = %err);
                return SendOutcome::Rejected;
            }
        };

        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = outbound.as_ref() else {
            warn!(event = "realtime_send_dropped", event_type = event_type, status = "closing");
            return SendOutcome::NotConnected;
        };
        match tx.try_send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(
                    event = "realtime_send_dropped",
                    event_type = event_type,
                    reason = "queue_full",
                    capacity = OUTBOUND_QUEUE
                );
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                warn!(event = "realtime_send_dropped", event_type = event_type, status = "closing");
                SendOutcome::NotConnected
            }
        }
    }

    pub fn join_room(&self, organization_id: i64) -> SendOutcome {
        self.send(JOIN_ORGANIZATION, &OrganizationRoom { organization_id })
    }

    pub fn leave_room(&self, organization_id: i64) -> SendOutcome {
        self.send(LEAVE_ORGANIZATION, &OrganizationRoom { organization_id })
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown.send(true);
        }
    }
}

impl fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConnection")
            .field("state", &self.state())
            .finish()
    }
}

fn outbound_message<T: Serialize + ?Sized>(
    event_type: &str,
    payload: &T,
) -> Result<Message, FrameError> {
    let frame = Frame::from_payload(event_type, payload)?;
    Ok(Message::Text(encode_frame(&frame, DEFAULT_MAX_FRAME_BYTES)?))
}

enum SessionEnd {
    Shutdown,
    Dropped(RealtimeError),
}

struct SessionOutcome {
    end: SessionEnd,
    /// A frame arrived or the session outlived [`STABLE_SESSION`].
    stable: bool,
}

struct Worker {
    config: RealtimeConfig,
    router: Arc<EventRouter>,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let budget = self.config.attempt_budget();
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                return;
            }
            self.shared
                .update(|state| state.status = ConnectionStatus::Connecting);

            let attempt = tokio::select! {
                _ = shutdown.changed() => return,
                result = connect_async(self.config.endpoint.as_str()) => result,
            };

            match attempt {
                Ok((ws, _response)) => {
                    let session = self.drive(ws, &mut shutdown).await;
                    self.shared.detach();
                    let err = match session.end {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Dropped(err) => err,
                    };
                    failures = if session.stable { 0 } else { failures + 1 };
                    warn!(
                        event = "realtime_connection_lost",
                        endpoint = %self.config.endpoint,
                        stable = session.stable,
                        attempt = failures,
                        error = %err
                    );
                    if self.record_failure(failures, budget, &err) {
                        return;
                    }
                }
                Err(err) => {
                    failures += 1;
                    let err = RealtimeError::from(err);
                    warn!(
                        event = "realtime_connect_error",
                        endpoint = %self.config.endpoint,
                        attempt = failures,
                        budget = budget,
                        error = %err
                    );
                    if self.record_failure(failures, budget, &err) {
                        return;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    /// Publishes the failure; returns true once the budget is spent.
    fn record_failure(&self, failures: u32, budget: u32, err: &RealtimeError) -> bool {
        let exhausted = failures >= budget;
        self.shared.update(|state| {
            state.status = ConnectionStatus::Errored;
            state.last_error = Some(err.to_string());
            state.failed_attempts = failures;
            state.retries_exhausted = exhausted;
        });
        if exhausted {
            error!(
                event = "realtime_reconnect_exhausted",
                endpoint = %self.config.endpoint,
                attempts = failures
            );
        }
        exhausted
    }

    async fn drive(&self, ws: WsStream, shutdown: &mut watch::Receiver<bool>) -> SessionOutcome {
        let (mut sink, mut stream) = ws.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        self.shared.attach(tx);
        self.shared.update(|state| {
            state.status = ConnectionStatus::Connected;
            state.last_error = None;
            state.retries_exhausted = false;
        });
        info!(
            event = "realtime_connected",
            endpoint = %self.config.endpoint,
            organization_id = ?self.config.organization_id
        );

        if let Some(organization_id) = self.config.organization_id {
            if let Err(err) = join_room(&mut sink, organization_id).await {
                return SessionOutcome {
                    end: SessionEnd::Dropped(err),
                    stable: false,
                };
            }
            info!(event = "realtime_room_joined", organization_id = organization_id);
        }

        let mut writer = tokio::spawn(write_outbound(sink, rx, shutdown.clone()));
        let settle = tokio::time::sleep(STABLE_SESSION);
        tokio::pin!(settle);
        let mut stable = false;

        let end = loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break SessionEnd::Shutdown,
                written = &mut writer => {
                    let err = match written {
                        Ok(Err(err)) => err,
                        Ok(Ok(())) => RealtimeError::Closed("writer stopped".to_string()),
                        Err(err) => RealtimeError::Closed(err.to_string()),
                    };
                    return SessionOutcome {
                        end: SessionEnd::Dropped(err),
                        stable,
                    };
                }
                _ = &mut settle, if !stable => {
                    stable = true;
                    self.shared.update(|state| state.failed_attempts = 0);
                }
                incoming = stream.next() => {
                    let raw = match incoming {
                        Some(Ok(Message::Text(text))) => text.into_bytes(),
                        Some(Ok(Message::Binary(bytes))) => bytes,
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|frame| format!("{} {}", frame.code, frame.reason))
                                .unwrap_or_else(|| "closed by server".to_string());
                            break SessionEnd::Dropped(RealtimeError::Closed(reason));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => break SessionEnd::Dropped(err.into()),
                        None => {
                            break SessionEnd::Dropped(RealtimeError::Closed(
                                "stream ended".to_string(),
                            ))
                        }
                    };
                    if *shutdown.borrow() {
                        break SessionEnd::Shutdown;
                    }
                    if !stable {
                        stable = true;
                        self.shared.update(|state| state.failed_attempts = 0);
                    }
                    self.route(&raw);
                }
            }
        };

        match end {
            SessionEnd::Shutdown => {
                if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                    writer.abort();
                }
            }
            SessionEnd::Dropped(_) => writer.abort(),
        }
        SessionOutcome { end, stable }
    }

    fn route(&self, raw: &[u8]) {
        match decode_frame(raw, DEFAULT_MAX_FRAME_BYTES) {
            Ok(frame) => {
                self.router.dispatch(&frame.event, &frame.payload);
            }
            Err(err) => {
                warn!(event = "realtime_frame_invalid", error = %err);
            }
        }
    }
}

async fn join_room(
    sink: &mut SplitSink<WsStream, Message>,
    organization_id: i64,
) -> Result<(), RealtimeError> {
    let join = outbound_message(JOIN_ORGANIZATION, &OrganizationRoom { organization_id })?;
    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(join)).await {
        Ok(written) => Ok(written?),
        Err(_) => Err(RealtimeError::WriteTimeout(WRITE_TIMEOUT)),
    }
}

/// Drains the session's outbound queue onto the socket. Each write is bounded
/// by [`WRITE_TIMEOUT`]; a shutdown request closes the socket instead.
async fn write_outbound(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RealtimeError> {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            written = tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)) => match written {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(RealtimeError::WriteTimeout(WRITE_TIMEOUT)),
            },
        }
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_endpoint;
    use crate::router::HandlerSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unreachable_config(attempts: u32) -> RealtimeConfig {
        // port 9 (discard) on loopback is closed in test environments
        RealtimeConfig::new(parse_endpoint("ws://127.0.0.1:9/ws").expect("endpoint"))
            .with_reconnect(attempts, Duration::from_millis(10))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disabled_config_stays_inert() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = Arc::new(EventRouter::new());
        router.register_handlers(HandlerSet::new().on("campaign-status", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let connection = RealtimeConnection::new(router);

        connection
            .connect(unreachable_config(3).with_enabled(false))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(connection.state(), ConnectionState::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_while_disconnected_is_a_silent_no_op() {
        let connection = RealtimeConnection::new(Arc::new(EventRouter::new()));
        assert_eq!(
            connection.send("custom", &serde_json::json!({"a": 1})),
            SendOutcome::NotConnected
        );
        assert_eq!(connection.join_room(1), SendOutcome::NotConnected);
        assert_eq!(connection.leave_room(1), SendOutcome::NotConnected);
        assert!(connection
            .shared
            .outbound
            .lock()
            .expect("outbound lock")
            .is_none());
        assert_eq!(connection.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exhausted_attempts_leave_a_sticky_error() {
        let connection = RealtimeConnection::new(Arc::new(EventRouter::new()));
        let mut states = connection.subscribe();
        connection.connect(unreachable_config(3)).await;

        let settled = tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| state.retries_exhausted),
        )
        .await
        .expect("attempts exhausted in time")
        .expect("state channel open")
        .clone();

        assert!(settled.is_persistent_failure());
        assert_eq!(settled.failed_attempts, 3);
        assert!(settled.last_error.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = connection.state();
        assert_eq!(later.failed_attempts, 3);
        assert_eq!(later.status, ConnectionStatus::Errored);

        connection.disconnect().await;
        assert_eq!(connection.state(), ConnectionState::default());
    }
}
