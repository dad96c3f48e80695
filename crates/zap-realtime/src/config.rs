use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:3001/ws";
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

pub const ENV_URL: &str = "ZAP_REALTIME_URL";
pub const ENV_ENABLED: &str = "ZAP_REALTIME_ENABLED";
pub const ENV_RECONNECT_ATTEMPTS: &str = "ZAP_REALTIME_RECONNECT_ATTEMPTS";
pub const ENV_RECONNECT_DELAY_MS: &str = "ZAP_REALTIME_RECONNECT_DELAY_MS";
pub const ENV_ORGANIZATION_ID: &str = "ZAP_ORGANIZATION_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint '{value}': {source}")]
    InvalidEndpoint {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported endpoint scheme '{0}', expected ws, wss, http or https")]
    UnsupportedScheme(String),
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} must be a boolean flag, got '{value}'")]
    InvalidFlag { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub endpoint: Url,
    pub organization_id: Option<i64>,
    pub enabled: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl RealtimeConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            organization_id: None,
            enabled: true,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_organization(mut self, organization_id: i64) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay = delay;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Consecutive failed attempts tolerated before giving up. Never zero.
    pub fn attempt_budget(&self) -> u32 {
        self.reconnect_attempts.max(1)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let endpoint = parse_endpoint(read(ENV_URL).as_deref().unwrap_or(DEFAULT_ENDPOINT))?;
        let mut config = Self::new(endpoint);

        if let Some(value) = read(ENV_ENABLED) {
            config.enabled = parse_bool_flag(&value).ok_or(ConfigError::InvalidFlag {
                key: ENV_ENABLED,
                value,
            })?;
        }
        if let Some(value) = read(ENV_RECONNECT_ATTEMPTS) {
            config.reconnect_attempts = parse_number(ENV_RECONNECT_ATTEMPTS, value)?;
        }
        if let Some(value) = read(ENV_RECONNECT_DELAY_MS) {
            let millis: u64 = parse_number(ENV_RECONNECT_DELAY_MS, value)?;
            config.reconnect_delay = Duration::from_millis(millis);
        }
        if let Some(value) = read(ENV_ORGANIZATION_ID) {
            config.organization_id = Some(value.trim().parse::<i64>().map_err(|_| {
                ConfigError::InvalidNumber {
                    key: ENV_ORGANIZATION_ID,
                    value,
                }
            })?);
        }
        Ok(config)
    }
}

/// Parses an endpoint, rewriting `http(s)` to the matching WebSocket scheme.
pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidEndpoint {
        value: raw.to_string(),
        source,
    })?;
    let target = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(target)
        .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
    Ok(url)
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = RealtimeConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.endpoint.as_str(), DEFAULT_ENDPOINT);
        assert!(config.enabled);
        assert_eq!(config.organization_id, None);
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(1000));
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            (ENV_URL, "https://push.example.com/socket"),
            (ENV_ENABLED, "off"),
            (ENV_RECONNECT_ATTEMPTS, "3"),
            (ENV_RECONNECT_DELAY_MS, "250"),
            (ENV_ORGANIZATION_ID, " 42 "),
        ]))
        .expect("config");
        assert_eq!(config.endpoint.as_str(), "wss://push.example.com/socket");
        assert!(!config.enabled);
        assert_eq!(config.reconnect_attempts, 3);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.organization_id, Some(42));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            (ENV_URL, "  "),
            (ENV_ORGANIZATION_ID, ""),
        ]))
        .expect("config");
        assert_eq!(config.endpoint.as_str(), DEFAULT_ENDPOINT);
        assert_eq!(config.organization_id, None);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = RealtimeConfig::from_lookup(lookup(&[(ENV_RECONNECT_ATTEMPTS, "-1")]))
            .expect_err("negative attempts");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: ENV_RECONNECT_ATTEMPTS,
                ..
            }
        ));

        let err = RealtimeConfig::from_lookup(lookup(&[(ENV_ENABLED, "maybe")]))
            .expect_err("bad flag");
        assert!(matches!(err, ConfigError::InvalidFlag { .. }));

        let err = RealtimeConfig::from_lookup(lookup(&[(ENV_URL, "ftp://host/ws")]))
            .expect_err("bad scheme");
        assert!(matches!(err, ConfigError::UnsupportedScheme(scheme) if scheme == "ftp"));

        assert!(matches!(
            parse_endpoint("not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn attempt_budget_is_never_zero() {
        let config = RealtimeConfig::new(parse_endpoint(DEFAULT_ENDPOINT).expect("endpoint"))
            .with_reconnect(0, Duration::from_millis(5));
        assert_eq!(config.attempt_budget(), 1);
    }
}
