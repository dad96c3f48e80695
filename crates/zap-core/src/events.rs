//! Payload contracts for the events pushed by the campaign backend.

use crate::{CampaignStatus, ExecutionStatus, ExecutionType, LogLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const CAMPAIGN_STATUS: &str = "campaign-status";
pub const CAMPAIGN_LOG: &str = "campaign-log";
pub const EXECUTION_LOG: &str = "execution-log";
pub const BOT_HEALTH: &str = "bot-health";
pub const NOTIFICATION: &str = "notification";
pub const JOIN_ORGANIZATION: &str = "join-organization";
pub const LEAVE_ORGANIZATION: &str = "leave-organization";

/// Inbound event types the dashboard understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CampaignStatus,
    CampaignLog,
    ExecutionLog,
    BotHealth,
    Notification,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::CampaignStatus,
        EventKind::CampaignLog,
        EventKind::ExecutionLog,
        EventKind::BotHealth,
        EventKind::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CampaignStatus => CAMPAIGN_STATUS,
            EventKind::CampaignLog => CAMPAIGN_LOG,
            EventKind::ExecutionLog => EXECUTION_LOG,
            EventKind::BotHealth => BOT_HEALTH,
            EventKind::Notification => NOTIFICATION,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == input.trim())
            .ok_or_else(|| format!("Unknown event type: {input}"))
    }
}

/// Producer-defined attachment carried verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct OpaqueData(pub Value);

impl OpaqueData {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStatusEvent {
    pub organization_id: i64,
    pub campaign_id: String,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execution: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_sessions: u32,
    #[serde(default)]
    pub total_sessions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignLogEvent {
    pub organization_id: i64,
    pub campaign_id: String,
    #[serde(default)]
    pub campaign_name: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OpaqueData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
}

/// One message-send attempt, either session-to-session or to a contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEvent {
    pub organization_id: i64,
    pub campaign_id: String,
    #[serde(default)]
    pub campaign_name: String,
    pub execution_id: String,
    pub execution_type: ExecutionType,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BotHealthEvent {
    pub organization_id: i64,
    pub campaign_id: String,
    pub session_id: String,
    #[serde(default)]
    pub session_name: String,
    pub health_score: f64,
    #[serde(default)]
    pub messages_per_day: f64,
    #[serde(default)]
    pub delivery_rate: f64,
    #[serde(default)]
    pub quality_sigma: f64,
    pub last_updated: DateTime<Utc>,
}

/// Alert category. Kinds the dashboard does not know yet are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
            NotificationKind::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for NotificationKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "info" => NotificationKind::Info,
            "success" => NotificationKind::Success,
            "warning" | "warn" => NotificationKind::Warning,
            "error" => NotificationKind::Error,
            _ => NotificationKind::Other(raw),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OpaqueData>,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `join-organization` and `leave-organization`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRoom {
    pub organization_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn campaign_status_decodes_camel_case_payload() {
        let event: CampaignStatusEvent = serde_json::from_value(serde_json::json!({
            "organizationId": 7,
            "campaignId": "c1",
            "name": "Warm-up wave",
            "status": "active",
            "description": "running",
            "nextExecution": "2026-03-01T10:00:00Z",
            "activeSessions": 3,
            "totalSessions": 4
        }))
        .expect("decode status");
        assert_eq!(event.organization_id, 7);
        assert_eq!(event.status, CampaignStatus::Active);
        assert_eq!(
            event.next_execution,
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single()
        );
        assert_eq!(event.active_sessions, 3);
    }

    #[test]
    fn execution_log_optional_fields_default_to_none() {
        let event: ExecutionLogEvent = serde_json::from_value(serde_json::json!({
            "organizationId": 1,
            "campaignId": "c1",
            "campaignName": "Launch",
            "executionId": "e-1",
            "executionType": "external",
            "status": "failed",
            "timestamp": "2026-03-01T10:00:00Z"
        }))
        .expect("decode execution");
        assert_eq!(event.execution_type, ExecutionType::External);
        assert!(event.status.is_terminal());
        assert!(event.contact_phone.is_none());
        assert!(event.executed_at.is_none());
    }

    #[test]
    fn notification_kind_keeps_unknown_values() {
        let event: NotificationEvent = serde_json::from_value(serde_json::json!({
            "type": "campaign-finished",
            "message": "done",
            "data": {"campaignId": "c1"},
            "timestamp": "2026-03-01T10:00:00Z"
        }))
        .expect("decode notification");
        assert_eq!(
            event.kind,
            NotificationKind::Other("campaign-finished".to_string())
        );
        assert_eq!(
            event.data.as_ref().and_then(|data| data.get("campaignId")),
            Some(&serde_json::json!("c1"))
        );

        let encoded = serde_json::to_value(&event).expect("encode notification");
        assert_eq!(encoded["type"], "campaign-finished");

        let known: NotificationKind = serde_json::from_str("\"Warning\"").expect("decode kind");
        assert_eq!(known, NotificationKind::Warning);
    }

    #[test]
    fn event_kind_round_trips_through_keys() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("typing".parse::<EventKind>().is_err());
    }

    #[test]
    fn organization_room_uses_wire_field_name() {
        let raw = serde_json::to_value(OrganizationRoom { organization_id: 1 }).expect("encode");
        assert_eq!(raw, serde_json::json!({"organizationId": 1}));
    }
}
