use crate::domain::{
    parse_topic, FlatPayload, MeshEnvelope, NormalizeError, ParsedTopic, PayloadKind,
    PositionPayload, TelemetryPayload, TopicConfig,
};
use common::domain::{Battery, DevicePatch};

/// Fixed-point coordinate scale used by mesh position packets
const COORDINATE_SCALE: f64 = 1e-7;

/// A decoded message: who it is about and what it says
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUpdate {
    pub device_id: String,
    pub kind: PayloadKind,
    pub patch: DevicePatch,
}

/// Maps `(topic, payload)` pairs onto canonical partial records.
///
/// The topic decides the payload shape; payloads are never probed against
/// several schemas. Unit conversions:
/// - flat `battery_mv` is stored as-is with unit millivolts
/// - envelope `latitude_i`/`longitude_i` are scaled by 1e-7 into degrees
/// - envelope `battery_level` (0-100) is rounded to the nearest integer, unit percent
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    topics: TopicConfig,
}

impl Normalizer {
    pub fn new(topics: TopicConfig) -> Self {
        Self { topics }
    }

    pub fn normalize(&self, topic: &str, payload: &[u8]) -> Result<NormalizedUpdate, NormalizeError> {
        match parse_topic(&self.topics, topic)? {
            ParsedTopic::Flat { device_id } => normalize_flat(device_id, payload),
            ParsedTopic::Envelope { .. } => normalize_envelope(payload),
        }
    }
}

fn normalize_flat(device_id: String, payload: &[u8]) -> Result<NormalizedUpdate, NormalizeError> {
    let flat: FlatPayload = serde_json::from_slice(payload)?;
    let lat = flat.lat.ok_or(NormalizeError::MissingField("lat"))?;
    let lon = flat.lon.ok_or(NormalizeError::MissingField("lon"))?;

    Ok(NormalizedUpdate {
        device_id,
        kind: PayloadKind::Flat,
        patch: DevicePatch {
            lat: Some(lat),
            lon: Some(lon),
            alt: Some(flat.alt),
            speed: Some(flat.speed),
            course: Some(flat.course),
            sats: Some(flat.sats),
            hdop: Some(flat.hdop),
            battery: Some(Battery::millivolts(flat.battery_mv)),
            rssi: Some(flat.rssi),
            snr: Some(flat.snr),
        },
    })
}

fn normalize_envelope(payload: &[u8]) -> Result<NormalizedUpdate, NormalizeError> {
    let envelope: MeshEnvelope = serde_json::from_slice(payload)?;
    let device_id = node_id(envelope.from);

    match envelope.packet_type.as_str() {
        "position" => {
            let position: PositionPayload = serde_json::from_value(envelope.payload)?;
            if position.latitude_i == 0 && position.longitude_i == 0 {
                return Err(NormalizeError::NoFix);
            }
            Ok(NormalizedUpdate {
                device_id,
                kind: PayloadKind::EnvelopePosition,
                patch: DevicePatch {
                    lat: Some(position.latitude_i as f64 * COORDINATE_SCALE),
                    lon: Some(position.longitude_i as f64 * COORDINATE_SCALE),
                    alt: Some(position.altitude),
                    speed: Some(position.ground_speed),
                    sats: Some(position.sats_in_view),
                    ..Default::default()
                },
            })
        }
        "telemetry" => {
            let telemetry: TelemetryPayload = serde_json::from_value(envelope.payload)?;
            // Environment sensors report telemetry without either metric.
            if telemetry.battery_level == 0.0 && telemetry.voltage == 0.0 {
                return Err(NormalizeError::NoDeviceMetrics);
            }
            Ok(NormalizedUpdate {
                device_id,
                kind: PayloadKind::EnvelopeTelemetry,
                patch: DevicePatch {
                    battery: Some(Battery::percent(telemetry.battery_level.round() as i64)),
                    ..Default::default()
                },
            })
        }
        other => Err(NormalizeError::UnsupportedPacketType(other.to_string())),
    }
}

/// Canonical identity for a mesh node number: `!` followed by 8 lowercase hex digits
pub fn node_id(from: u32) -> String {
    format!("!{:08x}", from)
}
