use crate::config::Role;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Everything the upstream meter can report. One store cell per variant;
/// last write wins, cells are independent of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    Power,
    PowerL1,
    PowerL2,
    PowerL3,
    Voltage,
    Current,
    Frequency,
    EnergyForward,
    EnergyReverse,
}

impl Measurement {
    pub const COUNT: usize = 9;

    /// Topic suffix → measurement table for a role. Order here is the
    /// subscription order on (re)connect.
    pub fn topic_map(role: Role) -> &'static [(&'static str, Measurement)] {
        match role {
            Role::Grid => &[
                ("power", Measurement::Power),
                ("p_l1", Measurement::PowerL1),
                ("p_l2", Measurement::PowerL2),
                ("p_l3", Measurement::PowerL3),
                ("180", Measurement::EnergyForward),
                ("280", Measurement::EnergyReverse),
            ],
            Role::Pv => &[
                ("power", Measurement::Power),
                ("voltage", Measurement::Voltage),
                ("current", Measurement::Current),
                ("frequency", Measurement::Frequency),
                ("energy_180", Measurement::EnergyForward),
                ("energy_280", Measurement::EnergyReverse),
            ],
        }
    }

    pub fn from_suffix(role: Role, suffix: &str) -> Option<Measurement> {
        Self::topic_map(role)
            .iter()
            .find(|(s, _)| *s == suffix)
            .map(|(_, m)| *m)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub value: f64,
    pub received_at: Instant,
}

/// Latest value + receipt time per measurement. Writers (subscriber
/// callbacks) and the reader (publish tick) only ever contend on a single
/// cell's lock, so a slow reader never stalls unrelated topics.
#[derive(Default)]
pub struct SampleStore {
    cells: [Mutex<Option<Sample>>; Measurement::COUNT],
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite unconditionally, stamped with the current instant.
    pub fn set(&self, m: Measurement, value: f64) {
        *self.cells[m as usize].lock().unwrap() = Some(Sample {
            value,
            received_at: Instant::now(),
        });
    }

    pub fn get(&self, m: Measurement) -> Option<Sample> {
        *self.cells[m as usize].lock().unwrap()
    }

    pub fn value(&self, m: Measurement) -> Option<f64> {
        self.get(m).map(|s| s.value)
    }

    /// Elapsed time since the last receipt, or None if never received.
    pub fn age(&self, m: Measurement) -> Option<Duration> {
        self.get(m).map(|s| s.received_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn absent_until_first_set() {
        let store = SampleStore::new();
        assert!(store.get(Measurement::Power).is_none());
        assert!(store.age(Measurement::Power).is_none());
    }

    #[test]
    fn last_write_wins() {
        let store = SampleStore::new();
        store.set(Measurement::Power, 100.0);
        store.set(Measurement::Power, 250.5);
        assert_eq!(store.value(Measurement::Power), Some(250.5));
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_receipt_time() {
        let store = SampleStore::new();
        store.set(Measurement::Power, 42.0);
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(store.age(Measurement::Power), Some(Duration::from_secs(7)));
    }

    #[test]
    fn suffix_lookup_is_role_specific() {
        assert_eq!(
            Measurement::from_suffix(Role::Grid, "p_l2"),
            Some(Measurement::PowerL2)
        );
        assert_eq!(Measurement::from_suffix(Role::Pv, "p_l2"), None);
        assert_eq!(
            Measurement::from_suffix(Role::Pv, "energy_280"),
            Some(Measurement::EnergyReverse)
        );
        assert_eq!(
            Measurement::from_suffix(Role::Grid, "280"),
            Some(Measurement::EnergyReverse)
        );
        assert_eq!(Measurement::from_suffix(Role::Grid, "bogus"), None);
    }
}
