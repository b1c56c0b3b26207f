use crate::config::{MqttConfig, Role};
use crate::error::AppError;
use crate::store::{Measurement, SampleStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn build_options(cfg: &MqttConfig) -> MqttOptions {
    let client_id = cfg
        .client_id
        .clone()
        .unwrap_or_else(|| format!("mqtt-meter-bridge-{}", Uuid::new_v4()));
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(30)));
    opts.set_clean_start(cfg.clean_session.unwrap_or(true));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == 8883 {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn new(options: MqttOptions) -> (AsyncClient, EventLoop) {
    mqtt5::AsyncClient::new(options, 50)
}

async fn subscribe_all(client: &AsyncClient, topic_root: &str, role: Role) {
    for (suffix, _) in Measurement::topic_map(role) {
        let topic = format!("{topic_root}/{suffix}");
        if let Err(e) = client
            .subscribe(topic.clone(), mqtt5::mqttbytes::QoS::AtMostOnce)
            .await
        {
            warn!(topic = %topic, error = %e, "subscribe failed; will retry on next reconnect");
        }
    }
}

async fn next_event(eventloop: &mut EventLoop) -> Result<mqtt5::Event, AppError> {
    eventloop.poll().await.map_err(|e| AppError::Mqtt(e.to_string()))
}

/// Drive the MQTT event loop until shutdown: (re)subscribe on every
/// connack, funnel numeric payloads into the store, and back off with a
/// capped exponential delay when the broker is unreachable.
pub async fn run_subscriber(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic_root: String,
    role: Role,
    store: Arc<SampleStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                info!("subscriber stopping");
                return;
            }
            event = next_event(&mut eventloop) => match event {
                Ok(mqtt5::Event::Incoming(mqtt5::Incoming::ConnAck(_))) => {
                    backoff = INITIAL_BACKOFF;
                    info!(root = %topic_root, "connected to broker; subscribing topic set");
                    subscribe_all(&client, &topic_root, role).await;
                }
                Ok(mqtt5::Event::Incoming(mqtt5::Incoming::Publish(publish))) => {
                    if let Err(e) =
                        handle_publish(&topic_root, role, &store, &publish.topic, &publish.payload)
                    {
                        warn!(error = %e, "discarding message");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, retry_in_secs = backoff.as_secs(), "mqtt connection error");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            info!("subscriber stopping");
                            return;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Map one inbound message onto its store cell. Topics outside the
/// configured set are ignored; a malformed payload is an error for the
/// caller to log, never one that aborts the subscriber.
fn handle_publish(
    topic_root: &str,
    role: Role,
    store: &SampleStore,
    topic: &[u8],
    payload: &[u8],
) -> Result<(), AppError> {
    let Ok(topic) = std::str::from_utf8(topic) else {
        return Err(AppError::Payload {
            topic: format!("{topic:?}"),
            reason: "non-utf8 topic".into(),
        });
    };
    let Some(suffix) = topic
        .strip_prefix(topic_root)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        debug!(topic, "message outside configured root; ignoring");
        return Ok(());
    };
    let Some(measurement) = Measurement::from_suffix(role, suffix) else {
        debug!(topic, "no measurement mapped to topic for this role; ignoring");
        return Ok(());
    };
    let value = parse_payload(payload).map_err(|reason| AppError::Payload {
        topic: topic.to_string(),
        reason: reason.into(),
    })?;
    debug!(topic, value, "sample received");
    store.set(measurement, value);
    Ok(())
}

fn parse_payload(payload: &[u8]) -> Result<f64, &'static str> {
    let text = std::str::from_utf8(payload).map_err(|_| "not utf-8")?;
    let value: f64 = text.trim().parse().map_err(|_| "not a decimal number")?;
    if !value.is_finite() {
        return Err("not a finite number");
    }
    Ok(value)
}
