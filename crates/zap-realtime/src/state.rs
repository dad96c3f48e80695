//! Process-wide real-time state derived from pushed events.
//!
//! Status records and health snapshots are upserted by key; logs and
//! notifications are bounded newest-first feeds. Every update replaces the
//! published [`RealtimeSnapshot`] in one step, so readers never observe a
//! half-applied change.

use crate::feed::{EntryId, Feed};
use crate::router::HandlerSet;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use zap_core::events::EventKind;
use zap_core::{
    BotHealthEvent, CampaignLogEvent, CampaignStatusEvent, ExecutionLogEvent, NotificationEvent,
};

pub const CAMPAIGN_LOG_CAPACITY: usize = 100;
pub const EXECUTION_LOG_CAPACITY: usize = 200;
pub const NOTIFICATION_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthKey {
    pub campaign_id: String,
    pub session_id: String,
}

impl HealthKey {
    pub fn new(campaign_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            session_id: session_id.into(),
        }
    }

    fn of(event: &BotHealthEvent) -> Self {
        Self::new(event.campaign_id.clone(), event.session_id.clone())
    }
}

impl fmt::Display for HealthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.campaign_id, self.session_id)
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeSnapshot {
    pub campaign_statuses: Arc<HashMap<String, CampaignStatusEvent>>,
    pub campaign_logs: Feed<CampaignLogEvent>,
    pub execution_logs: Feed<ExecutionLogEvent>,
    pub bot_health: Arc<HashMap<HealthKey, BotHealthEvent>>,
    pub notifications: Feed<NotificationEvent>,
}

impl Default for RealtimeSnapshot {
    fn default() -> Self {
        Self {
            campaign_statuses: Arc::default(),
            campaign_logs: Feed::with_capacity(CAMPAIGN_LOG_CAPACITY),
            execution_logs: Feed::with_capacity(EXECUTION_LOG_CAPACITY),
            bot_health: Arc::default(),
            notifications: Feed::with_capacity(NOTIFICATION_CAPACITY),
        }
    }
}

impl RealtimeSnapshot {
    pub fn campaign_status(&self, campaign_id: &str) -> Option<&CampaignStatusEvent> {
        self.campaign_statuses.get(campaign_id)
    }

    pub fn bot_health(&self, campaign_id: &str, session_id: &str) -> Option<&BotHealthEvent> {
        self.bot_health.get(&HealthKey::new(campaign_id, session_id))
    }

    pub fn running_campaigns(&self) -> usize {
        self.campaign_statuses
            .values()
            .filter(|campaign| campaign.status.is_running())
            .count()
    }

    /// Campaign log lines for one campaign, newest first.
    pub fn logs_for_campaign<'a>(
        &'a self,
        campaign_id: &'a str,
    ) -> impl Iterator<Item = &'a CampaignLogEvent> + 'a {
        self.campaign_logs
            .iter()
            .map(|entry| &entry.item)
            .filter(move |log| log.campaign_id == campaign_id)
    }

    /// Health snapshots of every session in a campaign, ordered by session id.
    pub fn health_for_campaign(&self, campaign_id: &str) -> Vec<&BotHealthEvent> {
        let mut rows: Vec<&BotHealthEvent> = self
            .bot_health
            .values()
            .filter(|health| health.campaign_id == campaign_id)
            .collect();
        rows.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        rows
    }
}

/// Owner of the derived state. Only its own handlers and the three
/// mutation operations write to it.
#[derive(Debug)]
pub struct StateDistributor {
    state: watch::Sender<RealtimeSnapshot>,
    next_entry_id: AtomicU64,
}

impl Default for StateDistributor {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDistributor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RealtimeSnapshot::default());
        Self {
            state,
            next_entry_id: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> RealtimeSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RealtimeSnapshot> {
        self.state.subscribe()
    }

    pub fn campaign_status(&self, campaign_id: &str) -> Option<CampaignStatusEvent> {
        self.state.borrow().campaign_status(campaign_id).cloned()
    }

    pub fn bot_health(&self, campaign_id: &str, session_id: &str) -> Option<BotHealthEvent> {
        self.state
            .borrow()
            .bot_health(campaign_id, session_id)
            .cloned()
    }

    /// Handlers for the five inbound event types, ready for the router.
    pub fn handlers(self: &Arc<Self>) -> HandlerSet {
        let status = self.clone();
        let campaign_log = self.clone();
        let execution_log = self.clone();
        let health = self.clone();
        let notification = self.clone();
        HandlerSet::new()
            .on_typed(EventKind::CampaignStatus.as_str(), move |event: CampaignStatusEvent| {
                status.apply_campaign_status(event)
            })
            .on_typed(EventKind::CampaignLog.as_str(), move |event: CampaignLogEvent| {
                campaign_log.apply_campaign_log(event);
            })
            .on_typed(EventKind::ExecutionLog.as_str(), move |event: ExecutionLogEvent| {
                execution_log.apply_execution_log(event);
            })
            .on_typed(EventKind::BotHealth.as_str(), move |event: BotHealthEvent| {
                health.apply_bot_health(event)
            })
            .on_typed(EventKind::Notification.as_str(), move |event: NotificationEvent| {
                notification.apply_notification(event);
            })
    }

    pub fn apply_campaign_status(&self, event: CampaignStatusEvent) {
        debug!(
            event = "campaign_status_update",
            campaign_id = %event.campaign_id,
            status = %event.status
        );
        self.state.send_modify(|state| {
            Arc::make_mut(&mut state.campaign_statuses).insert(event.campaign_id.clone(), event);
        });
    }

    pub fn apply_campaign_log(&self, event: CampaignLogEvent) -> EntryId {
        let id = self.next_id();
        self.state
            .send_modify(|state| state.campaign_logs.push(id, event));
        id
    }

    pub fn apply_execution_log(&self, event: ExecutionLogEvent) -> EntryId {
        let id = self.next_id();
        self.state
            .send_modify(|state| state.execution_logs.push(id, event));
        id
    }

    pub fn apply_bot_health(&self, event: BotHealthEvent) {
        let key = HealthKey::of(&event);
        debug!(event = "bot_health_update", key = %key, score = event.health_score);
        self.state.send_modify(|state| {
            Arc::make_mut(&mut state.bot_health).insert(key, event);
        });
    }

    pub fn apply_notification(&self, event: NotificationEvent) -> EntryId {
        let id = self.next_id();
        self.state
            .send_modify(|state| state.notifications.push(id, event));
        id
    }

    /// Empties both log feeds in a single published update.
    pub fn clear_logs(&self) {
        self.state.send_modify(|state| {
            state.campaign_logs.clear();
            state.execution_logs.clear();
        });
    }

    pub fn clear_notifications(&self) {
        self.state
            .send_modify(|state| state.notifications.clear());
    }

    /// Removes the notification with `id`. Returns false when it is already gone.
    pub fn dismiss_notification(&self, id: EntryId) -> bool {
        self.state
            .send_if_modified(|state| state.notifications.remove(id).is_some())
    }

    fn next_id(&self) -> EntryId {
        EntryId(self.next_entry_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
