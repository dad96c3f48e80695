use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Callback bound to one event-type key. Runs on the connection task.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

pub type HandlerTable = HashMap<String, Handler>;

/// Handlers to register in one call, at most one per key.
#[derive(Default, Clone)]
pub struct HandlerSet {
    handlers: HandlerTable,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Registers a handler that receives the payload decoded as `T`.
    /// Payloads that do not decode are logged and skipped.
    pub fn on_typed<T, F>(self, event_type: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let key = event_type.clone();
        self.on(event_type, move |payload: &Value| match T::deserialize(payload) {
            Ok(decoded) => handler(decoded),
            Err(err) => {
                warn!(event = "realtime_payload_invalid", event_type = %key, error = %err);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerSet").field("events", &keys).finish()
    }
}

/// Keys in `incoming` replace those in `current`; every other key is kept.
pub fn merge_handlers(current: &HandlerTable, incoming: HandlerSet) -> HandlerTable {
    let mut next = current.clone();
    next.extend(incoming.handlers);
    next
}

/// Dispatch table from event-type key to handler.
#[derive(Default)]
pub struct EventRouter {
    table: RwLock<Arc<HandlerTable>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handlers(&self, handlers: HandlerSet) {
        let mut table = self
            .table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = merge_handlers(&table, handlers);
        *table = Arc::new(next);
    }

    /// Invokes the handler for `event_type`; returns false when none is registered.
    pub fn dispatch(&self, event_type: &str, payload: &Value) -> bool {
        let handler = self.current().get(event_type).cloned();
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => {
                debug!(event = "realtime_event_unhandled", event_type = event_type);
                false
            }
        }
    }

    pub fn registered_events(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.current().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn current(&self) -> Arc<HandlerTable> {
        self.table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("events", &self.registered_events())
            .finish()
    }
}
