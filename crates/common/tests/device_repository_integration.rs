#![cfg(feature = "integration-tests")]

use chrono::{Duration, DurationRound, Utc};
use common::domain::{BatteryUnit, DeviceRecord, DeviceRepository};
use common::postgres::{PostgresClient, PostgresConfig, PostgresDeviceRepository};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresDeviceRepository) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .expect("Failed to create client");

    let repository = PostgresDeviceRepository::new(client);
    repository
        .ensure_schema()
        .await
        .expect("Failed to apply schema");

    (postgres, repository)
}

// Postgres stores microseconds; truncate so round-trips compare equal.
fn now_micros() -> chrono::DateTime<Utc> {
    Utc::now().duration_trunc(Duration::microseconds(1)).unwrap()
}

fn device(id: &str, last_seen: chrono::DateTime<Utc>) -> DeviceRecord {
    DeviceRecord {
        id: id.to_string(),
        lat: 46.0569,
        lon: 14.5058,
        alt: 12.0,
        speed: 0.0,
        course: 0.0,
        sats: 8,
        hdop: 1.2,
        battery: 3900,
        battery_unit: BatteryUnit::Millivolts,
        rssi: -85.0,
        snr: 7.0,
        online: true,
        last_seen,
        created_at: last_seen,
    }
}

#[tokio::test]
async fn test_upsert_and_get_device() {
    let (_container, repo) = setup_test_db().await;
    let now = now_micros();

    let committed = repo.upsert_device(device("d1", now)).await.unwrap();
    assert_eq!(committed, device("d1", now));

    let fetched = repo.get_device("d1").await.unwrap().unwrap();
    assert_eq!(fetched, committed);
}

#[tokio::test]
async fn test_upsert_updates_in_place_and_keeps_created_at() {
    let (_container, repo) = setup_test_db().await;
    let first = now_micros() - Duration::minutes(5);
    repo.upsert_device(device("d1", first)).await.unwrap();

    let later = now_micros();
    let mut update = device("d1", later);
    update.battery = 87;
    update.battery_unit = BatteryUnit::Percent;
    let committed = repo.upsert_device(update).await.unwrap();

    assert_eq!(committed.created_at, first);
    assert_eq!(committed.last_seen, later);
    assert_eq!(committed.battery, 87);
    assert_eq!(committed.battery_unit, BatteryUnit::Percent);
    assert_eq!(repo.list_devices().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_nonexistent_device() {
    let (_container, repo) = setup_test_db().await;
    assert!(repo.get_device("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_devices_most_recent_first() {
    let (_container, repo) = setup_test_db().await;
    let now = now_micros();
    repo.upsert_device(device("a", now - Duration::hours(3))).await.unwrap();
    repo.upsert_device(device("b", now)).await.unwrap();
    repo.upsert_device(device("c", now - Duration::hours(1))).await.unwrap();

    let ids: Vec<String> = repo
        .list_devices()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();

    assert_eq!(ids, vec!["b", "c", "a"]);
}

#[tokio::test]
async fn test_delete_stale_devices() {
    let (_container, repo) = setup_test_db().await;
    let now = now_micros();
    repo.upsert_device(device("stale", now - Duration::hours(49))).await.unwrap();
    repo.upsert_device(device("fresh", now - Duration::hours(47))).await.unwrap();

    let removed = repo
        .delete_stale_devices(now - Duration::hours(48))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    let remaining = repo.list_devices().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "fresh");
}
