use crate::api::Error;
use crate::energy::EnergyReport;
use crate::model::{DeviceSnapshot, StrategySnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Fast,
    Medium,
    Slow,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Fast, Tier::Medium, Tier::Slow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Medium => "medium",
            Tier::Slow => "slow",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published value of one tier together with its refresh bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierState<T> {
    pub data: Option<Arc<T>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Set when the latest attempt failed, in which case `data` still holds the previous
    /// value, or when `data` was derived from another tier's stale value.
    pub stale: bool,
}

impl<T> Default for TierState<T> {
    fn default() -> Self {
        TierState {
            data: None,
            last_success: None,
            last_attempt: None,
            consecutive_failures: 0,
            last_error: None,
            stale: false,
        }
    }
}

impl<T> TierState<T> {
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_success.map(|t| now - t)
    }

    pub fn status(&self, now: DateTime<Utc>) -> TierStatus {
        TierStatus {
            last_success: self.last_success,
            last_attempt: self.last_attempt,
            age_secs: self.age(now).map(|a| a.num_milliseconds() as f64 / 1000.0),
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            stale: self.stale,
        }
    }
}

/// Data-less view of a tier's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub age_secs: Option<f64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub stale: bool,
}

/// The only handle able to change a tier's published state.
#[derive(Debug)]
pub struct TierWriter<T> {
    tier: Tier,
    sender: watch::Sender<TierState<T>>,
}

impl<T> TierWriter<T> {
    /// Swap in a freshly derived value and notify subscribers.
    pub fn publish(&self, data: T, at: DateTime<Utc>) {
        self.publish_derived(data, at, false);
    }

    /// Like `publish`, for a value computed from another tier's data. The value inherits
    /// the upstream staleness.
    pub fn publish_derived(&self, data: T, at: DateTime<Utc>, upstream_stale: bool) {
        let data = Arc::new(data);
        self.sender.send_modify(|state| {
            state.data = Some(data);
            state.last_success = Some(at);
            state.last_attempt = Some(at);
            state.consecutive_failures = 0;
            state.last_error = None;
            state.stale = upstream_stale;
        });
        log::trace!("{} tier published (stale: {})", self.tier, upstream_stale);
    }

    /// Record a failed refresh. The previous value stays published and subscribers are not
    /// woken up.
    pub fn fail(&self, error: &Error, at: DateTime<Utc>) -> u32 {
        let mut failures = 0;
        self.sender.send_if_modified(|state| {
            state.last_attempt = Some(at);
            state.consecutive_failures += 1;
            state.last_error = Some(error.to_string());
            state.stale = true;
            failures = state.consecutive_failures;
            false
        });
        log::trace!("{} tier failure #{} recorded", self.tier, failures);
        failures
    }
}

/// Write side of the store, split up so that every tier loop owns its writer.
#[derive(Debug)]
pub struct TierWriters {
    pub fast: TierWriter<DeviceSnapshot>,
    pub medium: TierWriter<EnergyReport>,
    pub slow: TierWriter<StrategySnapshot>,
}

/// Read side of the published state. Cheap to clone; never blocks writers.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    fast: watch::Receiver<TierState<DeviceSnapshot>>,
    medium: watch::Receiver<TierState<EnergyReport>>,
    slow: watch::Receiver<TierState<StrategySnapshot>>,
}

fn tier<T>(tier: Tier) -> (TierWriter<T>, watch::Receiver<TierState<T>>) {
    let (sender, receiver) = watch::channel(TierState::default());
    (TierWriter { tier, sender }, receiver)
}

pub fn new() -> (TierWriters, SnapshotStore) {
    let (fast, fast_rx) = tier(Tier::Fast);
    let (medium, medium_rx) = tier(Tier::Medium);
    let (slow, slow_rx) = tier(Tier::Slow);

    (
        TierWriters { fast, medium, slow },
        SnapshotStore {
            fast: fast_rx,
            medium: medium_rx,
            slow: slow_rx,
        },
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreView {
    pub devices: TierState<DeviceSnapshot>,
    pub energy: TierState<EnergyReport>,
    pub strategy: TierState<StrategySnapshot>,
}

impl SnapshotStore {
    pub fn devices(&self) -> TierState<DeviceSnapshot> {
        self.fast.borrow().clone()
    }

    pub fn energy(&self) -> TierState<EnergyReport> {
        self.medium.borrow().clone()
    }

    pub fn strategy(&self) -> TierState<StrategySnapshot> {
        self.slow.borrow().clone()
    }

    /// True once the fast tier succeeded at least once.
    pub fn is_ready(&self) -> bool {
        self.fast.borrow().last_success.is_some()
    }

    pub fn status(&self, tier: Tier, now: DateTime<Utc>) -> TierStatus {
        match tier {
            Tier::Fast => self.fast.borrow().status(now),
            Tier::Medium => self.medium.borrow().status(now),
            Tier::Slow => self.slow.borrow().status(now),
        }
    }

    pub fn view(&self) -> Result<StoreView, Error> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        Ok(StoreView {
            devices: self.devices(),
            energy: self.energy(),
            strategy: self.strategy(),
        })
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<TierState<DeviceSnapshot>> {
        self.fast.clone()
    }

    pub fn subscribe_energy(&self) -> watch::Receiver<TierState<EnergyReport>> {
        self.medium.clone()
    }

    pub fn subscribe_strategy(&self) -> watch::Receiver<TierState<StrategySnapshot>> {
        self.slow.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn publish_then_fail() {
        let (writers, store) = new();
        let mut devices = store.subscribe_devices();
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();

        assert!(!store.is_ready());
        assert!(matches!(store.view(), Err(Error::NotReady)));

        let snapshot = DeviceSnapshot::new(t0, Vec::new(), Default::default(), Default::default());
        writers.fast.publish(snapshot.clone(), t0);
        assert!(devices.has_changed().unwrap());
        devices.borrow_and_update();
        assert!(store.is_ready());

        let t1 = t0 + chrono::Duration::seconds(30);
        let failures = writers.fast.fail(&Error::Timeout("10s".to_string()), t1);
        assert_eq!(1, failures);
        assert!(!devices.has_changed().unwrap());

        let state = store.devices();
        assert_eq!(Some(&snapshot), state.data.as_deref());
        assert!(state.stale);
        assert_eq!(Some(t0), state.last_success);
        assert_eq!(Some(t1), state.last_attempt);
        assert_eq!(
            Some(30.0),
            store.status(Tier::Fast, t1).age_secs
        );

        writers.fast.publish(snapshot, t1);
        let state = store.devices();
        assert!(!state.stale);
        assert_eq!(0, state.consecutive_failures);
        assert_eq!(None, state.last_error);
    }

    #[test]
    fn tiers_are_independent() {
        let (writers, store) = new();
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();

        writers.slow.fail(&Error::ApiError("Error 5: busy".to_string()), t0);
        writers.medium.publish(EnergyReport::default(), t0);

        assert!(store.strategy().stale);
        assert!(!store.energy().stale);
        assert!(store.energy().data.is_some());
        assert!(store.devices().last_attempt.is_none());
    }
}
