//! Real-time event layer for the campaign dashboard: a reconnecting push
//! connection, a keyed event router and the derived state it feeds.

pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod router;
pub mod service;
pub mod state;

pub use config::{ConfigError, RealtimeConfig};
pub use connection::{ConnectionState, ConnectionStatus, RealtimeConnection, SendOutcome};
pub use error::RealtimeError;
pub use feed::{EntryId, Feed, FeedEntry};
pub use router::{merge_handlers, EventRouter, Handler, HandlerSet, HandlerTable};
pub use service::RealtimeService;
pub use state::{HealthKey, RealtimeSnapshot, StateDistributor};
