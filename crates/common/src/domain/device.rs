use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of the `battery` column.
///
/// Payload shapes report battery state differently (cell voltage vs. charge
/// level), so the value is always stored together with the unit it was
/// reported in. Values are never converted between units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryUnit {
    #[default]
    Unknown,
    Millivolts,
    Percent,
}

impl BatteryUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryUnit::Unknown => "unknown",
            BatteryUnit::Millivolts => "millivolts",
            BatteryUnit::Percent => "percent",
        }
    }
}

impl fmt::Display for BatteryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatteryUnit {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(BatteryUnit::Unknown),
            "millivolts" => Ok(BatteryUnit::Millivolts),
            "percent" => Ok(BatteryUnit::Percent),
            other => Err(DomainError::InvalidBatteryUnit(other.to_string())),
        }
    }
}

/// A battery reading: the value only means something next to its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Battery {
    pub value: i64,
    pub unit: BatteryUnit,
}

impl Battery {
    pub fn millivolts(value: i64) -> Self {
        Self {
            value,
            unit: BatteryUnit::Millivolts,
        }
    }

    pub fn percent(value: i64) -> Self {
        Self {
            value,
            unit: BatteryUnit::Percent,
        }
    }
}

/// Canonical device state, one row per device identity
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub course: f64,
    pub sats: i64,
    pub hdop: f64,
    pub battery: i64,
    pub battery_unit: BatteryUnit,
    pub rssi: f64,
    pub snr: f64,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// A record with every measured field at its "unknown" value
    pub fn empty(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            speed: 0.0,
            course: 0.0,
            sats: 0,
            hdop: 0.0,
            battery: 0,
            battery_unit: BatteryUnit::Unknown,
            rssi: 0.0,
            snr: 0.0,
            online: true,
            last_seen: now,
            created_at: now,
        }
    }
}

/// Canonical fields a payload can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Lat,
    Lon,
    Alt,
    Speed,
    Course,
    Sats,
    Hdop,
    Battery,
    Rssi,
    Snr,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Lat => "lat",
            CanonicalField::Lon => "lon",
            CanonicalField::Alt => "alt",
            CanonicalField::Speed => "speed",
            CanonicalField::Course => "course",
            CanonicalField::Sats => "sats",
            CanonicalField::Hdop => "hdop",
            CanonicalField::Battery => "battery",
            CanonicalField::Rssi => "rssi",
            CanonicalField::Snr => "snr",
        }
    }
}

/// A partial update produced by normalizing one inbound payload.
///
/// `Some` marks a field the payload actually carried; `None` fields are
/// carried forward from the stored record when the patch is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub sats: Option<i64>,
    pub hdop: Option<f64>,
    pub battery: Option<Battery>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
}

impl DevicePatch {
    /// Fields this patch carries, in canonical order
    pub fn present_fields(&self) -> Vec<CanonicalField> {
        let flags = [
            (self.lat.is_some(), CanonicalField::Lat),
            (self.lon.is_some(), CanonicalField::Lon),
            (self.alt.is_some(), CanonicalField::Alt),
            (self.speed.is_some(), CanonicalField::Speed),
            (self.course.is_some(), CanonicalField::Course),
            (self.sats.is_some(), CanonicalField::Sats),
            (self.hdop.is_some(), CanonicalField::Hdop),
            (self.battery.is_some(), CanonicalField::Battery),
            (self.rssi.is_some(), CanonicalField::Rssi),
            (self.snr.is_some(), CanonicalField::Snr),
        ];
        flags
            .into_iter()
            .filter_map(|(present, field)| present.then_some(field))
            .collect()
    }

    /// Merge this patch over `prior` (or an empty record on first sighting).
    ///
    /// The result is always online with `last_seen = now`; `created_at` is
    /// taken from the prior record when one exists.
    pub fn apply(&self, device_id: &str, prior: Option<&DeviceRecord>, now: DateTime<Utc>) -> DeviceRecord {
        let base = match prior {
            Some(record) => record.clone(),
            None => DeviceRecord::empty(device_id, now),
        };
        let (battery, battery_unit) = match self.battery {
            Some(reading) => (reading.value, reading.unit),
            None => (base.battery, base.battery_unit),
        };

        DeviceRecord {
            id: device_id.to_string(),
            lat: self.lat.unwrap_or(base.lat),
            lon: self.lon.unwrap_or(base.lon),
            alt: self.alt.unwrap_or(base.alt),
            speed: self.speed.unwrap_or(base.speed),
            course: self.course.unwrap_or(base.course),
            sats: self.sats.unwrap_or(base.sats),
            hdop: self.hdop.unwrap_or(base.hdop),
            battery,
            battery_unit,
            rssi: self.rssi.unwrap_or(base.rssi),
            snr: self.snr.unwrap_or(base.snr),
            online: true,
            last_seen: now,
            created_at: base.created_at,
        }
    }
}

/// Repository trait for device state persistence
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Insert or update the record keyed by `record.id`, returning the committed row.
    /// An existing row keeps its original `created_at`.
    async fn upsert_device(&self, record: DeviceRecord) -> DomainResult<DeviceRecord>;

    /// Get a device by ID
    async fn get_device(&self, device_id: &str) -> DomainResult<Option<DeviceRecord>>;

    /// List every device, most recently seen first
    async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>>;

    /// Delete devices whose `last_seen` is strictly before `cutoff`; returns the number removed
    async fn delete_stale_devices(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn full_record(now: DateTime<Utc>) -> DeviceRecord {
        DeviceRecord {
            id: "d1".to_string(),
            lat: 46.0569,
            lon: 14.5058,
            alt: 12.0,
            speed: 1.5,
            course: 90.0,
            sats: 8,
            hdop: 1.2,
            battery: 3900,
            battery_unit: BatteryUnit::Millivolts,
            rssi: -85.0,
            snr: 7.0,
            online: true,
            last_seen: now,
            created_at: now,
        }
    }

    #[test]
    fn test_apply_without_prior_defaults_missing_fields_to_zero() {
        let now = Utc::now();
        let patch = DevicePatch {
            battery: Some(Battery::percent(87)),
            ..Default::default()
        };

        let record = patch.apply("!deadbe00", None, now);

        assert_eq!(record.id, "!deadbe00");
        assert_eq!(record.lat, 0.0);
        assert_eq!(record.lon, 0.0);
        assert_eq!(record.battery, 87);
        assert_eq!(record.battery_unit, BatteryUnit::Percent);
        assert!(record.online);
        assert_eq!(record.last_seen, now);
        assert_eq!(record.created_at, now);
    }

    #[test]
    fn test_apply_quality_only_keeps_position_bitwise() {
        let created = Utc::now() - Duration::hours(1);
        let prior = full_record(created);
        let patch = DevicePatch {
            hdop: Some(0.9),
            rssi: Some(-70.0),
            snr: Some(9.5),
            sats: Some(11),
            ..Default::default()
        };
        let now = Utc::now();

        let record = patch.apply("d1", Some(&prior), now);

        assert_eq!(record.lat.to_bits(), prior.lat.to_bits());
        assert_eq!(record.lon.to_bits(), prior.lon.to_bits());
        assert_eq!(record.alt.to_bits(), prior.alt.to_bits());
        assert_eq!(record.speed.to_bits(), prior.speed.to_bits());
        assert_eq!(record.course.to_bits(), prior.course.to_bits());
        assert_eq!(record.hdop, 0.9);
        assert_eq!(record.sats, 11);
        assert_eq!(record.battery, 3900);
        assert_eq!(record.battery_unit, BatteryUnit::Millivolts);
        assert_eq!(record.created_at, created);
        assert_eq!(record.last_seen, now);
    }

    #[test]
    fn test_apply_marks_offline_record_online() {
        let now = Utc::now();
        let mut prior = full_record(now);
        prior.online = false;

        let record = DevicePatch::default().apply("d1", Some(&prior), now);

        assert!(record.online);
    }

    #[test]
    fn test_present_fields() {
        let patch = DevicePatch {
            lat: Some(1.0),
            lon: Some(2.0),
            battery: Some(Battery::millivolts(3700)),
            ..Default::default()
        };

        assert_eq!(
            patch.present_fields(),
            vec![CanonicalField::Lat, CanonicalField::Lon, CanonicalField::Battery]
        );
        assert!(DevicePatch::default().present_fields().is_empty());
    }

    #[test]
    fn test_battery_unit_round_trips_through_str() {
        for unit in [BatteryUnit::Unknown, BatteryUnit::Millivolts, BatteryUnit::Percent] {
            assert_eq!(unit.as_str().parse::<BatteryUnit>().unwrap(), unit);
        }
        assert!("volts".parse::<BatteryUnit>().is_err());
    }
}
