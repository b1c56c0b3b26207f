use mqtt_meter_bridge::bus::{InProcessService, MeterService};
use mqtt_meter_bridge::config::Config;
use mqtt_meter_bridge::liveness::LivenessMonitor;
use mqtt_meter_bridge::publisher::MeterPublisher;
use mqtt_meter_bridge::{engine, mqtt, SampleStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        role = ?cfg.meter.role,
        root = %cfg.meter.topic_root,
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        "loaded config"
    );

    // Registration failure is fatal; the supervisor restarts the process.
    let service: Arc<dyn MeterService> = Arc::new(InProcessService::new());
    let mut publisher = MeterPublisher::new(Arc::clone(&service), cfg.meter.clone())?;

    let store = Arc::new(SampleStore::new());
    let (client, eventloop) = mqtt::new(mqtt::build_options(&cfg.mqtt));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let subscriber = tokio::spawn(mqtt::run_subscriber(
        client,
        eventloop,
        cfg.meter.topic_root.clone(),
        cfg.meter.role,
        Arc::clone(&store),
        shutdown_rx,
    ));

    let mut monitor = LivenessMonitor::new(
        cfg.meter.role,
        Duration::from_secs(cfg.meter.stale_after_secs),
    );
    let mut tick = tokio::time::interval(Duration::from_millis(cfg.meter.publish_interval_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let sig = tokio::signal::ctrl_c();
    tokio::pin!(sig);
    loop {
        tokio::select! {
            biased;
            _ = &mut sig => {
                info!("shutdown requested");
                break;
            }
            _ = tick.tick() => {
                let live = monitor.check(&store);
                let snapshot = engine::compute(&store, &cfg.meter);
                publisher.publish(&snapshot, live);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = subscriber.await;
    publisher.shutdown();
    Ok(())
}
