use crate::config::{MeterConfig, Role};
use crate::error::AppError;
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Attribute paths the energy-management controller reads, as published by
/// the stock meter services.
pub mod paths {
    pub const AC_POWER: &str = "/Ac/Power";
    pub const AC_VOLTAGE: &str = "/Ac/Voltage";
    pub const AC_CURRENT: &str = "/Ac/Current";
    pub const ENERGY_FORWARD: &str = "/Ac/Energy/Forward";
    pub const ENERGY_REVERSE: &str = "/Ac/Energy/Reverse";
    pub const PHASE_POWER: [&str; 3] = ["/Ac/L1/Power", "/Ac/L2/Power", "/Ac/L3/Power"];
    pub const PHASE_VOLTAGE: [&str; 3] = ["/Ac/L1/Voltage", "/Ac/L2/Voltage", "/Ac/L3/Voltage"];
    pub const PHASE_CURRENT: [&str; 3] = ["/Ac/L1/Current", "/Ac/L2/Current", "/Ac/L3/Current"];
    pub const L1_FREQUENCY: &str = "/Ac/L1/Frequency";
    pub const L1_ENERGY_FORWARD: &str = "/Ac/L1/Energy/Forward";
    pub const MAX_POWER: &str = "/Ac/MaxPower";
    pub const POSITION: &str = "/Position";
    pub const STATUS_CODE: &str = "/StatusCode";
    pub const CONNECTED: &str = "/Connected";
    pub const UPDATE_INDEX: &str = "/UpdateIndex";
}

/// Identity the service registers under on the system bus.
#[derive(Debug, Clone)]
pub struct ServiceMeta {
    pub service_name: String,
    pub device_instance: u32,
    pub product_name: &'static str,
    pub product_id: u32,
}

impl ServiceMeta {
    pub fn for_meter(cfg: &MeterConfig) -> Self {
        match cfg.role {
            // Product/device ids of the ET340 meter the controller already
            // knows how to consume.
            Role::Grid => Self {
                service_name: format!(
                    "com.victronenergy.grid.mqtt_bridge_{}",
                    cfg.device_instance
                ),
                device_instance: cfg.device_instance,
                product_name: "Grid meter",
                product_id: 45069,
            },
            Role::Pv => Self {
                service_name: format!("com.victronenergy.pvinverter.mqtt_pv_{}", cfg.device_instance),
                device_instance: cfg.device_instance,
                product_name: "PV meter",
                product_id: 0xFFFF,
            },
        }
    }
}

/// Boundary to the bus-registration collaborator. The bridge only needs to
/// register once, push attribute values each tick, and deregister on
/// shutdown; object-path mechanics live behind this trait.
pub trait MeterService: Send + Sync {
    fn register(&self, meta: &ServiceMeta) -> Result<(), AppError>;
    /// Idempotent per-attribute write; None clears the attribute.
    fn set(&self, path: &'static str, value: Option<f64>);
    fn deregister(&self);
}

/// In-process attribute table. Stands where the platform bus binding plugs
/// in; tests read published values back through [`InProcessService::get`].
#[derive(Default)]
pub struct InProcessService {
    registered: Mutex<Option<String>>,
    attrs: RwLock<BTreeMap<&'static str, Option<f64>>>,
}

impl InProcessService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<f64> {
        self.attrs.read().unwrap().get(path).copied().flatten()
    }
}

impl MeterService for InProcessService {
    fn register(&self, meta: &ServiceMeta) -> Result<(), AppError> {
        let mut registered = self.registered.lock().unwrap();
        if let Some(existing) = registered.as_deref() {
            return Err(AppError::Registration(format!(
                "service already registered as {existing}"
            )));
        }
        info!(
            service = %meta.service_name,
            instance = meta.device_instance,
            product = meta.product_name,
            product_id = meta.product_id,
            "registered meter service"
        );
        *registered = Some(meta.service_name.clone());
        Ok(())
    }

    fn set(&self, path: &'static str, value: Option<f64>) {
        debug!(path, value = %display_value(path, value), "attribute update");
        self.attrs.write().unwrap().insert(path, value);
    }

    fn deregister(&self) {
        if let Some(name) = self.registered.lock().unwrap().take() {
            info!(service = %name, "deregistered meter service");
        }
    }
}

/// Human-readable attribute text, matching the stock services' formatting.
fn display_value(path: &str, value: Option<f64>) -> String {
    let Some(v) = value else {
        return "-".into();
    };
    if path.ends_with("/Power") {
        format!("{v:.0}W")
    } else if path.ends_with("/Voltage") {
        format!("{v:.1}V")
    } else if path.ends_with("/Current") {
        format!("{v:.2}A")
    } else if path.ends_with("/Frequency") {
        format!("{v:.2}Hz")
    } else if path.contains("/Energy/") {
        format!("{v:.2}kWh")
    } else {
        format!("{v:.0}")
    }
}
