use crate::config::{MeterConfig, Role};
use crate::store::{Measurement, SampleStore};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseReading {
    pub power_w: f64,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
    pub frequency_hz: Option<f64>,
}

/// One publish cycle's view of the meter, derived from the store and
/// discarded after publication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterSnapshot {
    pub total_power_w: f64,
    pub phases: [PhaseReading; 3],
    pub energy_forward_kwh: Option<f64>,
    pub energy_reverse_kwh: Option<f64>,
}

/// Derive the current snapshot from the latest samples. Never waits on a
/// fresh sample and never fails; absent inputs degrade to zero power.
pub fn compute(store: &SampleStore, cfg: &MeterConfig) -> MeterSnapshot {
    match cfg.role {
        Role::Grid => compute_grid(store, cfg),
        Role::Pv => compute_pv(store, cfg),
    }
}

fn compute_grid(store: &SampleStore, cfg: &MeterConfig) -> MeterSnapshot {
    let aggregate = store.get(Measurement::Power);
    let individual = (
        store.get(Measurement::PowerL1),
        store.get(Measurement::PowerL2),
        store.get(Measurement::PowerL3),
    );

    // Per-phase samples win only when all three phases reported and none
    // predates the aggregate sample; a fresh `power` message re-derives
    // the equal split, so the latest message wins regardless of kind.
    let (total, powers) = match individual {
        (Some(l1), Some(l2), Some(l3))
            if aggregate.map_or(true, |agg| {
                let oldest = l1.received_at.min(l2.received_at).min(l3.received_at);
                oldest >= agg.received_at
            }) =>
        {
            (l1.value + l2.value + l3.value, [l1.value, l2.value, l3.value])
        }
        _ => {
            let p = aggregate.map_or(0.0, |s| s.value);
            (p, [p / 3.0; 3])
        }
    };

    let volts = cfg.nominal_voltage;
    let phases = powers.map(|p| PhaseReading {
        power_w: p,
        voltage_v: Some(volts),
        current_a: (volts > 0.0).then(|| p / volts),
        frequency_hz: None,
    });

    MeterSnapshot {
        total_power_w: total,
        phases,
        energy_forward_kwh: store.value(Measurement::EnergyForward).map(wh_to_kwh),
        energy_reverse_kwh: store.value(Measurement::EnergyReverse).map(wh_to_kwh),
    }
}

fn compute_pv(store: &SampleStore, cfg: &MeterConfig) -> MeterSnapshot {
    // The upstream meter sees the inverter's export, so power and current
    // arrive with the meter's sign and are flipped for the inverter model.
    let power = store.value(Measurement::Power).map(|p| -p).unwrap_or(0.0);
    let voltage = store
        .value(Measurement::Voltage)
        .unwrap_or(cfg.nominal_voltage);
    let current = store
        .value(Measurement::Current)
        .map(|c| -c)
        .or_else(|| (voltage > 0.0).then(|| power / voltage));
    let frequency = store
        .value(Measurement::Frequency)
        .unwrap_or(cfg.nominal_frequency);

    let mut phases = [PhaseReading::default(); 3];
    phases[0] = PhaseReading {
        power_w: power,
        voltage_v: Some(voltage),
        current_a: current,
        frequency_hz: Some(frequency),
    };

    // Production counter is the meter's export register; absent reads
    // publish as 0 kWh, matching the upstream service convention.
    let produced = store
        .value(Measurement::EnergyReverse)
        .map(wh_to_kwh)
        .unwrap_or(0.0);

    MeterSnapshot {
        total_power_w: power,
        phases,
        energy_forward_kwh: Some(produced),
        energy_reverse_kwh: None,
    }
}

/// Wh → kWh, rounded to 3 decimals as the upstream service reports it.
fn wh_to_kwh(wh: f64) -> f64 {
    wh.round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Measurement::*;
    use pretty_assertions::assert_eq;

    fn grid_cfg() -> MeterConfig {
        MeterConfig {
            role: Role::Grid,
            topic_root: "home/meter".into(),
            publish_interval_ms: 1000,
            stale_after_secs: 30,
            device_instance: 0,
            nominal_voltage: 230.0,
            nominal_frequency: 50.0,
            position: 0,
            max_power_w: None,
        }
    }

    fn pv_cfg() -> MeterConfig {
        MeterConfig {
            role: Role::Pv,
            ..grid_cfg()
        }
    }

    #[test]
    fn aggregate_splits_equally_across_phases() {
        let store = SampleStore::new();
        store.set(Power, 300.0);
        let snap = compute(&store, &grid_cfg());
        assert_eq!(snap.total_power_w, 300.0);
        for phase in &snap.phases {
            assert_eq!(phase.power_w, 100.0);
        }
        let sum: f64 = snap.phases.iter().map(|p| p.power_w).sum();
        assert!((sum - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn equal_split_is_exact_for_awkward_values() {
        let store = SampleStore::new();
        store.set(Power, 1000.0);
        let snap = compute(&store, &grid_cfg());
        let sum: f64 = snap.phases.iter().map(|p| p.power_w).sum();
        assert!((sum - 1000.0).abs() <= 1e-9);
    }

    #[test]
    fn individual_phases_override_the_split() {
        let store = SampleStore::new();
        store.set(Power, 300.0);
        store.set(PowerL1, 150.0);
        store.set(PowerL2, 100.0);
        store.set(PowerL3, 50.0);
        let snap = compute(&store, &grid_cfg());
        assert_eq!(snap.phases[0].power_w, 150.0);
        assert_eq!(snap.phases[1].power_w, 100.0);
        assert_eq!(snap.phases[2].power_w, 50.0);
        // total is the phase sum, not the aggregate sample
        assert_eq!(snap.total_power_w, 300.0);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_aggregate_resplits_after_phase_override() {
        let store = SampleStore::new();
        store.set(PowerL1, 150.0);
        store.set(PowerL2, 100.0);
        store.set(PowerL3, 50.0);
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        store.set(Power, 600.0);
        let snap = compute(&store, &grid_cfg());
        assert_eq!(snap.total_power_w, 600.0);
        for phase in &snap.phases {
            assert_eq!(phase.power_w, 200.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_aggregate_does_not_displace_fresher_phases() {
        let store = SampleStore::new();
        store.set(Power, 600.0);
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        store.set(PowerL1, 150.0);
        store.set(PowerL2, 100.0);
        store.set(PowerL3, 50.0);
        let snap = compute(&store, &grid_cfg());
        assert_eq!(snap.total_power_w, 300.0);
        assert_eq!(snap.phases[0].power_w, 150.0);
    }

    #[test]
    fn partial_phase_set_falls_back_to_split() {
        let store = SampleStore::new();
        store.set(Power, 300.0);
        store.set(PowerL1, 150.0);
        store.set(PowerL2, 100.0);
        let snap = compute(&store, &grid_cfg());
        for phase in &snap.phases {
            assert_eq!(phase.power_w, 100.0);
        }
    }

    #[test]
    fn absent_power_degrades_to_zero_keeping_energy() {
        let store = SampleStore::new();
        store.set(EnergyForward, 12_345.0);
        store.set(EnergyReverse, 6_789.0);
        let snap = compute(&store, &grid_cfg());
        assert_eq!(snap.total_power_w, 0.0);
        assert_eq!(snap.phases[0].power_w, 0.0);
        assert_eq!(snap.energy_forward_kwh, Some(12.345));
        assert_eq!(snap.energy_reverse_kwh, Some(6.789));
    }

    #[test]
    fn lower_energy_value_is_accepted_as_reset() {
        let store = SampleStore::new();
        store.set(EnergyForward, 50_000.0);
        let before = compute(&store, &grid_cfg());
        assert_eq!(before.energy_forward_kwh, Some(50.0));
        // replaced meter starts over
        store.set(EnergyForward, 1_000.0);
        let after = compute(&store, &grid_cfg());
        assert_eq!(after.energy_forward_kwh, Some(1.0));
    }

    #[test]
    fn grid_derives_current_from_nominal_voltage() {
        let store = SampleStore::new();
        store.set(Power, 690.0);
        let snap = compute(&store, &grid_cfg());
        assert_eq!(snap.phases[0].voltage_v, Some(230.0));
        assert_eq!(snap.phases[0].current_a, Some(1.0));
    }

    #[test]
    fn pv_negates_power_and_maps_export_to_production() {
        let store = SampleStore::new();
        store.set(Power, 1500.0);
        store.set(EnergyReverse, 2_500.0);
        let snap = compute(&store, &pv_cfg());
        assert_eq!(snap.total_power_w, -1500.0);
        assert_eq!(snap.phases[0].power_w, -1500.0);
        assert_eq!(snap.energy_forward_kwh, Some(2.5));
        assert_eq!(snap.energy_reverse_kwh, None);
    }

    #[test]
    fn pv_falls_back_to_nominal_voltage_and_frequency() {
        let store = SampleStore::new();
        store.set(Power, 460.0);
        let snap = compute(&store, &pv_cfg());
        assert_eq!(snap.phases[0].voltage_v, Some(230.0));
        assert_eq!(snap.phases[0].frequency_hz, Some(50.0));
        assert_eq!(snap.phases[0].current_a, Some(-2.0));
    }

    #[test]
    fn pv_reported_current_wins_over_derived() {
        let store = SampleStore::new();
        store.set(Power, 460.0);
        store.set(Current, 2.1);
        let snap = compute(&store, &pv_cfg());
        assert_eq!(snap.phases[0].current_a, Some(-2.1));
    }
}
