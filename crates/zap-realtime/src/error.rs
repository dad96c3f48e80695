use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use zap_core::wire::FrameError;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("socket write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("connection closed: {0}")]
    Closed(String),
}
