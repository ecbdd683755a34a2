use common::domain::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// `mqtt://host:port`, `tcp://host:port` or `host:port`
    pub broker_url: String,

    pub client_id: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Consecutive failed sessions tolerated before giving up (default: 10)
    pub max_retry_attempts: u32,

    /// Delay between reconnect attempts (default: 5 seconds)
    pub retry_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "beacon-device-tracker".to_string(),
            username: None,
            password: None,
            max_retry_attempts: 10,
            retry_delay_secs: 5,
        }
    }
}

impl MqttConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Broker credentials; a username without a password (or the reverse) is rejected
    pub fn credentials(&self) -> DomainResult<Option<(&str, &str)>> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Some((username.as_str(), password.as_str()))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(DomainError::InvalidConfig(
                "MQTT username is set but password is missing".to_string(),
            )),
            (None, Some(_)) => Err(DomainError::InvalidConfig(
                "MQTT password is set but username is missing".to_string(),
            )),
        }
    }
}
