use crate::domain::DeviceIngestionService;
use crate::mqtt::MqttConfig;
use anyhow::Context;
use common::domain::{DomainError, DomainResult};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Run the MQTT subscriber until cancelled
///
/// Subscribes to every filter in `filters` and hands each publish to the
/// ingestion service. Broken sessions are retried after a delay; the retry
/// count resets whenever the broker accepts a connection. Gives up with an
/// error after `max_retry_attempts` consecutive failures.
#[instrument(
    name = "mqtt_subscriber",
    skip_all,
    fields(broker_url = %config.broker_url, client_id = %config.client_id)
)]
pub async fn run_mqtt_subscriber(
    config: MqttConfig,
    filters: Vec<String>,
    ingestion: DeviceIngestionService,
    token: CancellationToken,
) -> anyhow::Result<()> {
    // A half-configured credential pair is fatal, not retried.
    config.credentials()?;

    info!(filters = ?filters, "starting MQTT subscriber");

    let mut retry_count = 0;

    loop {
        // Check for cancellation before attempting connection
        if token.is_cancelled() {
            debug!("MQTT subscriber cancelled before connection");
            break;
        }

        match run_mqtt_connection(&config, &filters, &ingestion, &token, &mut retry_count).await {
            Ok(()) => {
                debug!("MQTT subscriber stopped cleanly");
                break;
            }
            Err(e) => {
                error!(error = %e, "MQTT connection error");

                retry_count += 1;
                if retry_count >= config.max_retry_attempts {
                    error!(
                        max_retries = config.max_retry_attempts,
                        "max retry attempts reached, stopping MQTT subscriber"
                    );
                    return Err(e.context("MQTT subscriber gave up"));
                }

                warn!(
                    attempt = retry_count,
                    max_attempts = config.max_retry_attempts,
                    "retrying MQTT connection"
                );

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(config.retry_delay()) => {}
                }
            }
        }
    }

    info!("MQTT subscriber stopped");
    Ok(())
}

/// Run a single MQTT session; `Ok` only on cancellation
async fn run_mqtt_connection(
    config: &MqttConfig,
    filters: &[String],
    ingestion: &DeviceIngestionService,
    token: &CancellationToken,
    retry_count: &mut u32,
) -> anyhow::Result<()> {
    let (host, port) = parse_broker_url(&config.broker_url)?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);
    if let Some((username, password)) = config.credentials()? {
        mqtt_options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    for filter in filters {
        client
            .subscribe(filter.as_str(), QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to {filter}"))?;
        debug!(filter = %filter, "subscription requested");
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("shutdown signal received");
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        dispatch_publish(ingestion, &publish);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                        *retry_count = 0;
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("subscription acknowledged");
                    }
                    Ok(_) => {
                        // Pings and outgoing packets
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!("MQTT event loop error: {}", e));
                    }
                }
            }
        }
    }
}

/// Hand a publish to ingestion without awaiting it
pub(crate) fn dispatch_publish(ingestion: &DeviceIngestionService, publish: &Publish) {
    ingestion.on_message(&publish.topic, publish.payload.clone());
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
fn parse_broker_url(url: &str) -> DomainResult<(&str, u16)> {
    let url = url.trim_start_matches("mqtt://");
    let url = url.trim_start_matches("tcp://");

    let parts: Vec<&str> = url.split(':').collect();
    match parts.as_slice() {
        [host] if !host.is_empty() => Ok((*host, 1883)),
        [host, port] if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| {
                DomainError::InvalidConfig(format!("invalid port in broker URL: {}", port))
            })?;
            Ok((*host, port))
        }
        _ => Err(DomainError::InvalidConfig(format!(
            "invalid broker URL format: {}",
            url
        ))),
    }
}
