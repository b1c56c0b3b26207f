use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Which meter the bridge impersonates on the bus. Determines the MQTT
/// topic subset and the exposed attribute set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Grid,
    Pv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub meter: MeterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    pub role: Role,
    /// Topic prefix the upstream meter publishes under, e.g. "home/power/meter".
    pub topic_root: String,
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    /// No sample within this window marks the meter disconnected.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub device_instance: u32,
    /// Assumed phase voltage where the upstream meter does not report one.
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,
    #[serde(default = "default_nominal_frequency")]
    pub nominal_frequency: f64,
    /// 0 = AC input 1, 1 = AC output, 2 = AC input 2.
    #[serde(default)]
    pub position: u8,
    /// PV only: rated inverter power in W.
    pub max_power_w: Option<f64>,
}

fn default_publish_interval_ms() -> u64 {
    1000
}
fn default_stale_after_secs() -> u64 {
    30
}
fn default_nominal_voltage() -> f64 {
    230.0
}
fn default_nominal_frequency() -> f64 {
    50.0
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        anyhow::ensure!(!cfg.mqtt.host.is_empty(), "mqtt.host must not be empty");
        anyhow::ensure!(
            !cfg.meter.topic_root.is_empty(),
            "meter.topic_root must not be empty"
        );
        anyhow::ensure!(
            cfg.meter.publish_interval_ms > 0,
            "meter.publish_interval_ms must be positive"
        );
        while cfg.meter.topic_root.ends_with('/') {
            cfg.meter.topic_root.pop();
        }
        Ok(cfg)
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" escapes a literal "$"; any other "$" passes through unchanged.
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        let close = match rest.as_bytes().first() {
            Some(b'$') => {
                out.push('$');
                rest = &rest[1..];
                continue;
            }
            Some(b'(') => ')',
            Some(b'{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        let end = rest[1..]
            .find(close)
            .with_context(|| format!("unterminated env placeholder: missing '{close}'"))?;
        let var = &rest[1..1 + end];
        let val = std::env::var(var)
            .with_context(|| format!("missing environment variable: {var}"))?;
        out.push_str(&val);
        rest = &rest[2 + end..];
    }
    out.push_str(rest);
    Ok(out)
}
