use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use zap_core::events::{OrganizationRoom, JOIN_ORGANIZATION, LEAVE_ORGANIZATION};
use zap_core::wire::{decode_frame, encode_frame, Frame, FrameError, DEFAULT_MAX_FRAME_BYTES};

const CLIENT_QUEUE: usize = 256;

#[derive(Clone, Debug)]
pub(crate) struct HubConfig {
    pub(crate) addr: String,
    pub(crate) debug: bool,
    pub(crate) ping_interval: Duration,
    pub(crate) write_timeout: Duration,
}

struct Client {
    conn_id: String,
    sender: mpsc::Sender<Message>,
}

impl Client {
    async fn send_text(&self, text: String) -> bool {
        self.sender.send(Message::Text(text)).await.is_ok()
    }
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    recipients: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Connected dashboards and the organization rooms they joined.
pub(crate) struct HubState {
    config: HubConfig,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    rooms: RwLock<HashMap<i64, HashSet<String>>>,
}

impl HubState {
    pub(crate) fn new(config: HubConfig) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    #[cfg(test)]
    async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    #[cfg(test)]
    async fn room_size(&self, organization_id: i64) -> usize {
        self.rooms
            .read()
            .await
            .get(&organization_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    async fn register_client(&self, client: Arc<Client>) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        info!(event = "client_connected", conn_id = %client.conn_id);
    }

    async fn remove_client(&self, conn_id: &str, reason: &str) {
        let removed = self.clients.write().await.remove(conn_id).is_some();
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
        if removed {
            info!(event = "client_removed", conn_id = %conn_id, reason = reason);
        }
    }

    async fn join(&self, conn_id: &str, organization_id: i64) {
        self.rooms
            .write()
            .await
            .entry(organization_id)
            .or_default()
            .insert(conn_id.to_string());
        info!(event = "room_join", conn_id = %conn_id, organization_id = organization_id);
    }

    async fn leave(&self, conn_id: &str, organization_id: i64) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&organization_id) {
            members.remove(conn_id);
            if members.is_empty() {
                rooms.remove(&organization_id);
            }
        }
        info!(event = "room_leave", conn_id = %conn_id, organization_id = organization_id);
    }

    /// Fans `frame` out to its organization room, or to every client when the
    /// payload names no organization. Returns how many clients took it.
    pub(crate) async fn publish(&self, frame: &Frame) -> Result<usize, FrameError> {
        let text = encode_frame(frame, DEFAULT_MAX_FRAME_BYTES)?;
        let recipients: Vec<Arc<Client>> = {
            let clients = self.clients.read().await;
            match frame.organization_id() {
                Some(organization_id) => {
                    let rooms = self.rooms.read().await;
                    rooms
                        .get(&organization_id)
                        .into_iter()
                        .flatten()
                        .filter_map(|conn_id| clients.get(conn_id).cloned())
                        .collect()
                }
                None => clients.values().cloned().collect(),
            }
        };

        let mut delivered = 0;
        for client in recipients {
            if client.send_text(text.clone()).await {
                delivered += 1;
            } else {
                self.remove_client(&client.conn_id, "send_failed").await;
            }
        }
        debug!(
            event = "publish",
            event_type = %frame.event,
            organization_id = ?frame.organization_id(),
            recipients = delivered
        );
        Ok(delivered)
    }

    fn start_ping(self: Arc<Self>, client: Arc<Client>) -> Option<JoinHandle<()>> {
        if self.config.ping_interval.is_zero() {
            return None;
        }
        let interval = self.config.ping_interval;
        let hub = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if client.sender.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!(event = "ping_failed", conn_id = %client.conn_id);
                    hub.remove_client(&client.conn_id, "ping_failed").await;
                    return;
                }
            }
        }))
    }

    async fn handle_frame(&self, conn_id: &str, frame: Frame) {
        match frame.event.as_str() {
            JOIN_ORGANIZATION | LEAVE_ORGANIZATION => {
                let room: OrganizationRoom = match serde_json::from_value(frame.payload) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(event = "room_payload_invalid", conn_id = %conn_id, error = %err);
                        return;
                    }
                };
                if frame.event == JOIN_ORGANIZATION {
                    self.join(conn_id, room.organization_id).await;
                } else {
                    self.leave(conn_id, room.organization_id).await;
                }
            }
            other => {
                debug!(event = "client_event_ignored", conn_id = %conn_id, event_type = other);
            }
        }
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_QUEUE);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        });

        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            sender: tx,
        });
        info!(event = "client_accepted", conn_id = %client.conn_id, remote = %remote);
        self.register_client(client.clone()).await;
        let ping = self.clone().start_ping(client.clone());

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                    break;
                }
            };
            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %client.conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if self.config.debug {
                debug!(event = "message_received", conn_id = %client.conn_id, raw = %String::from_utf8_lossy(&data));
            }
            match decode_frame(&data, DEFAULT_MAX_FRAME_BYTES) {
                Ok(frame) => self.handle_frame(&client.conn_id, frame).await,
                Err(err) => {
                    warn!(event = "message_invalid", conn_id = %client.conn_id, error = %err);
                }
            }
        }

        self.remove_client(&client.conn_id, "disconnect").await;
        if let Some(ping) = ping {
            ping.abort();
        }
        drop(client);
        let _ = write_task.await;
    }
}

pub(crate) fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/events", post(publish_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

async fn publish_handler(
    State(hub): State<Arc<HubState>>,
    Json(frame): Json<Frame>,
) -> impl IntoResponse {
    match hub.publish(&frame).await {
        Ok(recipients) => Json(PublishResponse { recipients }).into_response(),
        Err(err) => {
            warn!(event = "publish_rejected", event_type = %frame.event, error = %err);
            let status = match err {
                FrameError::OversizedFrame { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}
