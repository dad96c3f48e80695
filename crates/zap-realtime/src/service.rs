use crate::config::RealtimeConfig;
use crate::connection::{ConnectionState, RealtimeConnection};
use crate::error::RealtimeError;
use crate::router::{EventRouter, HandlerSet};
use crate::state::StateDistributor;
use std::sync::Arc;
use tokio::sync::watch;

/// Router, state and connection wired together for one process.
///
/// The distributor's handlers are registered before any connection starts,
/// so no event arrives ahead of them.
#[derive(Debug)]
pub struct RealtimeService {
    router: Arc<EventRouter>,
    state: Arc<StateDistributor>,
    connection: RealtimeConnection,
}

impl Default for RealtimeService {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeService {
    pub fn new() -> Self {
        let router = Arc::new(EventRouter::new());
        let state = Arc::new(StateDistributor::new());
        router.register_handlers(state.handlers());
        let connection = RealtimeConnection::new(router.clone());
        Self {
            router,
            state,
            connection,
        }
    }

    pub async fn start(config: RealtimeConfig) -> Self {
        let service = Self::new();
        service.connection.connect(config).await;
        service
    }

    pub async fn start_from_env() -> Result<Self, RealtimeError> {
        let config = RealtimeConfig::from_env()?;
        Ok(Self::start(config).await)
    }

    pub async fn reconnect(&self, config: RealtimeConfig) {
        self.connection.connect(config).await;
    }

    pub async fn stop(&self) {
        self.connection.disconnect().await;
    }

    /// Adds handlers for extra event types. A key already routed to the
    /// state distributor is replaced.
    pub fn register_handlers(&self, handlers: HandlerSet) {
        self.router.register_handlers(handlers);
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn state(&self) -> &Arc<StateDistributor> {
        &self.state
    }

    pub fn connection(&self) -> &RealtimeConnection {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }
}
