pub mod events;
pub mod wire;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use events::{
    BotHealthEvent, CampaignLogEvent, CampaignStatusEvent, EventKind, ExecutionLogEvent,
    NotificationEvent, NotificationKind, OpaqueData, OrganizationRoom,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Stopped,
    Waiting,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Stopped => "stopped",
            CampaignStatus::Waiting => "waiting",
        }
    }

    /// True while the campaign is expected to keep producing executions.
    pub fn is_running(&self) -> bool {
        matches!(self, CampaignStatus::Active | CampaignStatus::Waiting)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "stopped" => Ok(CampaignStatus::Stopped),
            "waiting" => Ok(CampaignStatus::Waiting),
            other => Err(format!("Unknown campaign status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "success" => Ok(LogLevel::Success),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

/// Whether a send goes between two of our own sessions (warm-up) or to an
/// outside contact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Internal,
    External,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Internal => "internal",
            ExecutionType::External => "external",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "internal" => Ok(ExecutionType::Internal),
            "external" => Ok(ExecutionType::External),
            other => Err(format!("Unknown execution type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Sending,
    Sent,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Sending => "sending",
            ExecutionStatus::Sent => "sent",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Sent | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "sending" => Ok(ExecutionStatus::Sending),
            "sent" => Ok(ExecutionStatus::Sent),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("Unknown execution status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!(
            " Paused ".parse::<CampaignStatus>(),
            Ok(CampaignStatus::Paused)
        );
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert!("archived".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn only_active_and_waiting_campaigns_are_running() {
        let running: Vec<CampaignStatus> = [
            CampaignStatus::Active,
            CampaignStatus::Paused,
            CampaignStatus::Stopped,
            CampaignStatus::Waiting,
        ]
        .into_iter()
        .filter(CampaignStatus::is_running)
        .collect();
        assert_eq!(running, vec![CampaignStatus::Active, CampaignStatus::Waiting]);
    }

    #[test]
    fn enums_serialize_lowercase() {
        let raw = serde_json::to_string(&ExecutionStatus::Failed).expect("serialize");
        assert_eq!(raw, "\"failed\"");
        let parsed: ExecutionType = serde_json::from_str("\"internal\"").expect("parse");
        assert_eq!(parsed, ExecutionType::Internal);
        assert_eq!(CampaignStatus::Waiting.to_string(), "waiting");
    }
}
