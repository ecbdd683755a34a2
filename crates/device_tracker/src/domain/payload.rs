use common::domain::CanonicalField;
use serde::Deserialize;

/// Closed set of payload shapes the normalizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Single JSON object that is the whole device state
    Flat,
    /// Envelope with `type = "position"`
    EnvelopePosition,
    /// Envelope with `type = "telemetry"`
    EnvelopeTelemetry,
}

impl PayloadKind {
    /// Canonical fields a payload of this kind may populate
    pub fn carried_fields(&self) -> &'static [CanonicalField] {
        use CanonicalField::*;
        match self {
            PayloadKind::Flat => &[Lat, Lon, Alt, Speed, Course, Sats, Hdop, Battery, Rssi, Snr],
            PayloadKind::EnvelopePosition => &[Lat, Lon, Alt, Speed, Sats],
            PayloadKind::EnvelopeTelemetry => &[Battery],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Flat => "flat",
            PayloadKind::EnvelopePosition => "position",
            PayloadKind::EnvelopeTelemetry => "telemetry",
        }
    }
}

/// Flat status object published on `{namespace}/{id}/{suffix}`.
///
/// `lat`/`lon` are required; other keys default to 0 when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct FlatPayload {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub alt: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub course: f64,
    #[serde(default)]
    pub sats: i64,
    #[serde(default)]
    pub hdop: f64,
    /// Cell voltage in millivolts
    #[serde(default)]
    pub battery_mv: i64,
    #[serde(default)]
    pub rssi: f64,
    #[serde(default)]
    pub snr: f64,
}

/// Mesh packet envelope published on `{root}/{region}/2/json/...`
#[derive(Debug, Clone, Deserialize)]
pub struct MeshEnvelope {
    /// Sending node number
    pub from: u32,
    #[serde(rename = "type", default)]
    pub packet_type: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `payload` of a `position` packet
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PositionPayload {
    /// Degrees × 1e7
    pub latitude_i: i64,
    /// Degrees × 1e7
    pub longitude_i: i64,
    pub altitude: f64,
    pub ground_speed: f64,
    pub sats_in_view: i64,
}

/// `payload` of a `telemetry` packet
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryPayload {
    /// Charge level 0-100
    pub battery_level: f64,
    pub voltage: f64,
    pub channel_utilization: f64,
    pub air_util_tx: f64,
}
