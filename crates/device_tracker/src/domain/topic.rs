use crate::domain::NormalizeError;
use serde::{Deserialize, Serialize};

/// Topic literals recognized by the normalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// First segment of flat topics: `{flat_namespace}/{device_id}/{flat_suffix}`
    pub flat_namespace: String,
    /// Last segment of flat topics
    pub flat_suffix: String,
    /// First segment of enveloped topics: `{envelope_root}/{region}/2/json/{channel}/{gateway}`
    pub envelope_root: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            flat_namespace: "devices".to_string(),
            flat_suffix: "status".to_string(),
            envelope_root: "msh".to_string(),
        }
    }
}

impl TopicConfig {
    /// MQTT filters covering every topic shape this config recognizes
    pub fn subscription_filters(&self) -> Vec<String> {
        vec![
            format!("{}/+/{}", self.flat_namespace, self.flat_suffix),
            format!("{}/+/{}/{}/#", self.envelope_root, ENVELOPE_VERSION, ENVELOPE_FORMAT),
        ]
    }
}

const ENVELOPE_VERSION: &str = "2";
const ENVELOPE_FORMAT: &str = "json";

/// Topic shapes, classified before any payload decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTopic {
    /// The device identity is the middle segment
    Flat { device_id: String },
    /// The identity lives in the payload; the topic only routes
    Envelope {
        region: String,
        channel: String,
        gateway: Option<String>,
    },
}

/// Classify `topic` against the configured patterns
///
/// # Examples
/// ```
/// use device_tracker::domain::{parse_topic, ParsedTopic, TopicConfig};
///
/// let parsed = parse_topic(&TopicConfig::default(), "devices/d1/status").unwrap();
/// assert_eq!(parsed, ParsedTopic::Flat { device_id: "d1".to_string() });
/// ```
pub fn parse_topic(config: &TopicConfig, topic: &str) -> Result<ParsedTopic, NormalizeError> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() == 3 && parts[0] == config.flat_namespace && parts[2] == config.flat_suffix {
        let device_id = parts[1].trim();
        if device_id.is_empty() {
            return Err(NormalizeError::UnrecognizedTopic(topic.to_string()));
        }
        return Ok(ParsedTopic::Flat {
            device_id: device_id.to_string(),
        });
    }

    if parts.len() >= 5
        && parts[0] == config.envelope_root
        && parts[2] == ENVELOPE_VERSION
        && parts[3] == ENVELOPE_FORMAT
    {
        return Ok(ParsedTopic::Envelope {
            region: parts[1].to_string(),
            channel: parts[4].to_string(),
            gateway: parts.get(5).map(|s| s.to_string()),
        });
    }

    Err(NormalizeError::UnrecognizedTopic(topic.to_string()))
}
