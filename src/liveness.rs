use crate::config::Role;
use crate::store::{Measurement, SampleStore};
use std::time::Duration;
use tracing::{info, warn};

/// Per-instance lifecycle: Startup until the first required sample, then
/// Live/Stale driven by sample age. Termination is process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterState {
    Startup,
    Live,
    Stale,
}

/// Decides, ahead of each publish tick, whether the published meter may
/// report its computed powers or must be zeroed as disconnected.
pub struct LivenessMonitor {
    role: Role,
    threshold: Duration,
    state: MeterState,
}

impl LivenessMonitor {
    pub fn new(role: Role, threshold: Duration) -> Self {
        Self {
            role,
            threshold,
            state: MeterState::Startup,
        }
    }

    pub fn state(&self) -> MeterState {
        self.state
    }

    /// Age of the freshest required measurement, or None if none was ever
    /// received.
    fn required_age(&self, store: &SampleStore) -> Option<Duration> {
        match self.role {
            Role::Grid => store.age(Measurement::Power),
            Role::Pv => match (
                store.age(Measurement::Power),
                store.age(Measurement::Voltage),
            ) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }

    /// Advance the state machine and report whether the meter is live.
    pub fn check(&mut self, store: &SampleStore) -> bool {
        let live = matches!(self.required_age(store), Some(age) if age <= self.threshold);
        match (self.state, live) {
            (MeterState::Startup, true) => {
                info!("first telemetry received; meter is live");
                self.state = MeterState::Live;
            }
            (MeterState::Live, false) => {
                warn!(
                    threshold_secs = self.threshold.as_secs(),
                    "no telemetry within threshold; marking meter disconnected"
                );
                self.state = MeterState::Stale;
            }
            (MeterState::Stale, true) => {
                info!("telemetry resumed; meter is live again");
                self.state = MeterState::Live;
            }
            _ => {}
        }
        live
    }
}
