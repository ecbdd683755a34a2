use crate::domain::{DeviceRecord, DeviceRepository, DomainError, DomainResult};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use tracing::{debug, instrument};

/// DDL applied at startup; idempotent.
const DEVICES_SCHEMA: &str = include_str!("../../migrations/001_create_devices.sql");

const DEVICE_COLUMNS: &str = "id, lat, lon, alt, speed, course, sats, hdop, battery, battery_unit, rssi, snr, online, last_seen, created_at";

/// Device row for PostgreSQL storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRow {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub course: f64,
    pub sats: i64,
    pub hdop: f64,
    pub battery: i64,
    pub battery_unit: String,
    pub rssi: f64,
    pub snr: f64,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Row> for DeviceRow {
    fn from(row: &Row) -> Self {
        DeviceRow {
            id: row.get(0),
            lat: row.get(1),
            lon: row.get(2),
            alt: row.get(3),
            speed: row.get(4),
            course: row.get(5),
            sats: row.get(6),
            hdop: row.get(7),
            battery: row.get(8),
            battery_unit: row.get(9),
            rssi: row.get(10),
            snr: row.get(11),
            online: row.get(12),
            last_seen: row.get(13),
            created_at: row.get(14),
        }
    }
}

/// Convert database DeviceRow to domain DeviceRecord
impl TryFrom<DeviceRow> for DeviceRecord {
    type Error = DomainError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(DeviceRecord {
            id: row.id,
            lat: row.lat,
            lon: row.lon,
            alt: row.alt,
            speed: row.speed,
            course: row.course,
            sats: row.sats,
            hdop: row.hdop,
            battery: row.battery,
            battery_unit: row.battery_unit.parse()?,
            rssi: row.rssi,
            snr: row.snr,
            online: row.online,
            last_seen: row.last_seen,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL implementation of DeviceRepository trait
#[derive(Clone)]
pub struct PostgresDeviceRepository {
    client: PostgresClient,
}

impl PostgresDeviceRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    /// Create the devices table and its index if they do not exist
    pub async fn ensure_schema(&self) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.batch_execute(DEVICES_SCHEMA)
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!("devices schema ensured");
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for PostgresDeviceRepository {
    #[instrument(skip(self, record), fields(device_id = %record.id))]
    async fn upsert_device(&self, record: DeviceRecord) -> DomainResult<DeviceRecord> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let statement = format!(
            "INSERT INTO devices ({DEVICE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (id) DO UPDATE SET
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon,
                alt = EXCLUDED.alt,
                speed = EXCLUDED.speed,
                course = EXCLUDED.course,
                sats = EXCLUDED.sats,
                hdop = EXCLUDED.hdop,
                battery = EXCLUDED.battery,
                battery_unit = EXCLUDED.battery_unit,
                rssi = EXCLUDED.rssi,
                snr = EXCLUDED.snr,
                online = EXCLUDED.online,
                last_seen = EXCLUDED.last_seen
             RETURNING {DEVICE_COLUMNS}"
        );

        let row = conn
            .query_one(
                &statement,
                &[
                    &record.id,
                    &record.lat,
                    &record.lon,
                    &record.alt,
                    &record.speed,
                    &record.course,
                    &record.sats,
                    &record.hdop,
                    &record.battery,
                    &record.battery_unit.as_str(),
                    &record.rssi,
                    &record.snr,
                    &record.online,
                    &record.last_seen,
                    &record.created_at,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!("upserted device: {}", record.id);

        DeviceRow::from(&row).try_into()
    }

    #[instrument(skip(self), fields(device_id = %device_id))]
    async fn get_device(&self, device_id: &str) -> DomainResult<Option<DeviceRecord>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"),
                &[&device_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        match row {
            Some(row) => Ok(Some(DeviceRow::from(&row).try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY last_seen DESC, id ASC"),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!("found {} devices", rows.len());

        rows.iter()
            .map(|row| DeviceRow::from(row).try_into())
            .collect()
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn delete_stale_devices(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let removed = conn
            .execute("DELETE FROM devices WHERE last_seen < $1", &[&cutoff])
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!("deleted {} stale devices", removed);
        Ok(removed)
    }
}
