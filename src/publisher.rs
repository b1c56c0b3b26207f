use crate::bus::{paths, MeterService, ServiceMeta};
use crate::config::{MeterConfig, Role};
use crate::engine::MeterSnapshot;
use crate::error::AppError;
use std::sync::Arc;
use tracing::debug;

/// PV status codes shown by the controller UI.
const STATUS_RUNNING: f64 = 7.0;
const STATUS_STANDBY: f64 = 8.0;

/// Owns the registered service instance and pushes each tick's snapshot
/// onto its attributes. Registration happens in [`MeterPublisher::new`] and
/// is fatal to startup when it fails.
pub struct MeterPublisher {
    service: Arc<dyn MeterService>,
    cfg: MeterConfig,
    update_index: u8,
}

impl MeterPublisher {
    pub fn new(service: Arc<dyn MeterService>, cfg: MeterConfig) -> Result<Self, AppError> {
        let meta = ServiceMeta::for_meter(&cfg);
        service.register(&meta)?;
        service.set(paths::POSITION, Some(cfg.position as f64));
        if cfg.role == Role::Pv {
            service.set(paths::MAX_POWER, cfg.max_power_w);
        }
        Ok(Self {
            service,
            cfg,
            update_index: 0,
        })
    }

    /// Write one tick's values. When the meter is not live all powers read
    /// zero while energy counters hold their last published values.
    pub fn publish(&mut self, snapshot: &MeterSnapshot, live: bool) {
        let mut snap = snapshot.clone();
        if !live {
            snap.total_power_w = 0.0;
            for phase in &mut snap.phases {
                phase.power_w = 0.0;
                phase.current_a = phase.voltage_v.map(|_| 0.0);
            }
        }

        let svc = &self.service;
        svc.set(paths::AC_POWER, Some(snap.total_power_w));
        match self.cfg.role {
            Role::Grid => {
                for (i, phase) in snap.phases.iter().enumerate() {
                    svc.set(paths::PHASE_POWER[i], Some(phase.power_w));
                    svc.set(paths::PHASE_VOLTAGE[i], phase.voltage_v);
                    svc.set(paths::PHASE_CURRENT[i], phase.current_a);
                }
                if let Some(kwh) = snap.energy_forward_kwh {
                    svc.set(paths::ENERGY_FORWARD, Some(kwh));
                }
                if let Some(kwh) = snap.energy_reverse_kwh {
                    svc.set(paths::ENERGY_REVERSE, Some(kwh));
                }
            }
            Role::Pv => {
                let l1 = &snap.phases[0];
                svc.set(paths::AC_VOLTAGE, l1.voltage_v);
                svc.set(paths::AC_CURRENT, l1.current_a);
                svc.set(paths::PHASE_POWER[0], Some(l1.power_w));
                svc.set(paths::PHASE_VOLTAGE[0], l1.voltage_v);
                svc.set(paths::PHASE_CURRENT[0], l1.current_a);
                svc.set(paths::L1_FREQUENCY, l1.frequency_hz);
                if let Some(kwh) = snap.energy_forward_kwh {
                    svc.set(paths::ENERGY_FORWARD, Some(kwh));
                    svc.set(paths::L1_ENERGY_FORWARD, Some(kwh));
                }
                // producing at or above 10 W counts as running
                let status = if snap.total_power_w >= 10.0 {
                    STATUS_RUNNING
                } else {
                    STATUS_STANDBY
                };
                svc.set(paths::STATUS_CODE, Some(status));
            }
        }
        svc.set(paths::CONNECTED, Some(if live { 1.0 } else { 0.0 }));

        // wrap-around counter tells the controller fresh data arrived
        self.update_index = self.update_index.wrapping_add(1);
        svc.set(paths::UPDATE_INDEX, Some(self.update_index as f64));
        debug!(
            live,
            total_w = snap.total_power_w,
            index = self.update_index,
            "published snapshot"
        );
    }

    /// Cooperative shutdown: take the meter off the bus before exit so the
    /// controller never sees a dangling instance.
    pub fn shutdown(self) {
        self.service.deregister();
    }
}
