//! MQTT ingress: subscribes to the per-field telemetry topics and feeds
//! every publish to the reconciler.
//!
//! The reconciler's per-message result is the acknowledgement signal:
//! accepted and skipped messages complete normally, rejected ones are
//! logged and dropped. Broker reconnects are rumqttc's job; we just keep
//! polling the event loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::reconcile::{Ack, Reconciler};

/// The six per-field topic filters the original fleet publishes on.
pub const TOPIC_FILTERS: [&str; 6] = [
    "car/+/location/latitude",
    "car/+/location/longitude",
    "car/+/speed",
    "car/+/gear",
    "car/+/battery/+/soc",
    "car/+/battery/+/capacity",
];

/// Connects to the broker, subscribes, and pumps messages into the
/// reconciler until the shutdown flag flips.
pub async fn run_mqtt_ingest(
    broker_url: &str,
    reconciler: Arc<Reconciler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (host, port) = parse_broker_url(broker_url)?;
    let client_id = format!("car-state-reconciler-{}", std::process::id());

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut event_loop) = AsyncClient::new(options, 64);

    for filter in TOPIC_FILTERS {
        client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to '{filter}'"))?;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ingest stopping");
                    let _ = client.disconnect().await;
                    break;
                }
            }
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match reconciler
                        .handle_message(&publish.topic, &publish.payload)
                        .await
                    {
                        Ok(Ack::Accepted) => {
                            debug!(topic = %publish.topic, "message applied");
                        }
                        Ok(Ack::Skipped) => {}
                        Err(e) => {
                            warn!(topic = %publish.topic, error = %e, "dropping message");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = broker_url, "connected to MQTT broker");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    Ok(())
}

/// Accepts `mqtt://host:port`, `host:port` or a bare hostname (port 1883).
fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let stripped = url.strip_prefix("mqtt://").unwrap_or(url);

    match stripped.split_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid broker port in '{url}'"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((stripped.to_string(), 1883)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url_with_scheme() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
    }

    #[test]
    fn test_parse_broker_url_defaults_port() {
        assert_eq!(
            parse_broker_url("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_parse_broker_url_bad_port() {
        assert!(parse_broker_url("mqtt://localhost:notaport").is_err());
    }
}
