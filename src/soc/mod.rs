pub mod event;
pub mod rate_limit;

use crate::api::Error;
use crate::model::{DeviceSnapshot, Percent, SocLimits};
pub use event::{
    ChangeDirection, ChangeEvent, DerivedEvent, LimitEvent, LimitType, Side, ThresholdEvent,
    ThresholdName,
};
pub use rate_limit::RateLimiter;

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub fn system_key(device_id: &str) -> String {
    format!("battery_{}_system", device_id)
}

pub fn module_key(device_id: &str, module: u32) -> String {
    format!("battery_{}_module{}", device_id, module)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventConfig {
    pub critical_low: Percent,
    pub low: Percent,
    pub high: Percent,
    pub critical_high: Percent,
    pub change_threshold: Percent,
    pub limit_tolerance: Percent,
    pub min_interval: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        EventConfig {
            critical_low: 10.0,
            low: 20.0,
            high: 90.0,
            critical_high: 95.0,
            change_threshold: 5.0,
            limit_tolerance: 1.0,
            min_interval: Duration::seconds(60),
        }
    }
}

impl EventConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let values = [
            self.critical_low,
            self.low,
            self.high,
            self.critical_high,
            self.change_threshold,
            self.limit_tolerance,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Configuration(
                "event thresholds must be finite numbers".to_string(),
            ));
        }
        if !(0.0 <= self.critical_low
            && self.critical_low < self.low
            && self.low < self.high
            && self.high < self.critical_high
            && self.critical_high <= 100.0)
        {
            return Err(Error::Configuration(format!(
                "expected 0 <= critical_low < low < high < critical_high <= 100, got {} / {} / {} / {}",
                self.critical_low, self.low, self.high, self.critical_high
            )));
        }
        if self.change_threshold <= 0.0 {
            return Err(Error::Configuration(format!(
                "change_threshold must be positive, got {}",
                self.change_threshold
            )));
        }
        if self.limit_tolerance < 0.0 {
            return Err(Error::Configuration(format!(
                "limit_tolerance must not be negative, got {}",
                self.limit_tolerance
            )));
        }
        if self.min_interval < Duration::zero() {
            return Err(Error::Configuration(
                "min_interval must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Breakpoints in evaluation order.
    pub fn breakpoints(&self) -> [(ThresholdName, Percent); 4] {
        [
            (ThresholdName::CriticalLow, self.critical_low),
            (ThresholdName::Low, self.low),
            (ThresholdName::High, self.high),
            (ThresholdName::CriticalHigh, self.critical_high),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocReading {
    pub device_key: String,
    pub soc: Percent,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Threshold(ThresholdName),
    Change,
    Limit(LimitType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub device_key: String,
    pub signal: Signal,
}

impl SignalKey {
    fn new(device_key: &str, signal: Signal) -> SignalKey {
        SignalKey {
            device_key: device_key.to_string(),
            signal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocEventState {
    /// Device the key belongs to, used to tell skipped devices from removed ones.
    pub device_id: String,
    pub last_soc: Percent,
    pub observed_at: DateTime<Utc>,
    pub sides: BTreeMap<ThresholdName, Side>,
    pub baseline: Percent,
}

impl SocEventState {
    fn new(device_id: &str, reading: &SocReading, config: &EventConfig) -> SocEventState {
        SocEventState {
            device_id: device_id.to_string(),
            last_soc: reading.soc,
            observed_at: reading.observed_at,
            sides: sides_of(reading.soc, config),
            baseline: reading.soc,
        }
    }
}

fn sides_of(soc: Percent, config: &EventConfig) -> BTreeMap<ThresholdName, Side> {
    config
        .breakpoints()
        .iter()
        .map(|(name, value)| (*name, Side::of(soc, *value)))
        .collect()
}

fn limit_value(limits: &SocLimits, limit_type: LimitType) -> Option<Percent> {
    match limit_type {
        LimitType::StrategyMin => limits.strategy_min,
        LimitType::StrategyMax => limits.strategy_max,
        LimitType::BmsMin => limits.bms_min,
        LimitType::BmsMax => limits.bms_max,
        LimitType::HwMin => limits.hw_min,
        LimitType::HwMax => limits.hw_max,
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Derives threshold, change and limit events from successive SOC readings.
pub struct SocEventEngine {
    family_id: String,
    config: EventConfig,
    states: HashMap<String, SocEventState>,
    limiter: RateLimiter<SignalKey>,
}

impl SocEventEngine {
    pub fn new(family_id: String, config: EventConfig) -> Result<SocEventEngine, Error> {
        config.validate()?;
        Ok(SocEventEngine {
            family_id,
            limiter: RateLimiter::new(config.min_interval),
            config,
            states: HashMap::new(),
        })
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    /// Replace the whole configuration. Sides are recomputed from the last SOC of every key
    /// without firing.
    pub fn reconfigure(&mut self, config: EventConfig) -> Result<(), Error> {
        config.validate()?;
        self.limiter.set_min_interval(config.min_interval);
        for state in self.states.values_mut() {
            state.sides = sides_of(state.last_soc, &config);
        }
        self.config = config;
        log::info!("SOC event configuration replaced: {:?}", self.config);
        Ok(())
    }

    pub fn state(&self, device_key: &str) -> Option<&SocEventState> {
        self.states.get(device_key)
    }

    pub fn device_keys(&self) -> impl Iterator<Item = &String> {
        self.states.keys()
    }

    /// Forget a device key, including its rate limiter history.
    pub fn remove(&mut self, device_key: &str) -> Option<SocEventState> {
        self.limiter.retain(|key| key.device_key != device_key);
        self.states.remove(device_key)
    }

    pub fn update(&mut self, reading: &SocReading, limits: Option<&SocLimits>) -> Vec<DerivedEvent> {
        self.observe(None, reading, limits)
    }

    fn observe(
        &mut self,
        device_id: Option<&str>,
        reading: &SocReading,
        limits: Option<&SocLimits>,
    ) -> Vec<DerivedEvent> {
        let soc = reading.soc;
        if !soc.is_finite() || !(0.0..=100.0).contains(&soc) {
            log::warn!(
                "Ignoring out of range SOC {} for {}",
                soc,
                reading.device_key
            );
            return Vec::new();
        }

        let key = reading.device_key.as_str();
        let now = reading.observed_at;
        let state = match self.states.get_mut(key) {
            Some(state) => state,
            None => {
                let device_id = device_id.unwrap_or(key);
                log::debug!("Tracking SOC of {} starting at {}", key, soc);
                self.states.insert(
                    key.to_string(),
                    SocEventState::new(device_id, reading, &self.config),
                );
                return Vec::new();
            }
        };

        let previous = state.last_soc;
        state.last_soc = soc;
        state.observed_at = now;
        let mut events = Vec::new();

        for (name, value) in self.config.breakpoints() {
            let prior = state.sides.get(&name).copied();
            let side = match prior {
                Some(prior) => Side::after(previous, soc, value, prior),
                None => Side::of(soc, value),
            };
            state.sides.insert(name, side);
            if prior.map_or(false, |prior| prior != side)
                && self
                    .limiter
                    .allow(&SignalKey::new(key, Signal::Threshold(name)), now)
            {
                events.push(DerivedEvent::Threshold(ThresholdEvent {
                    device_key: key.to_string(),
                    family_id: self.family_id.clone(),
                    threshold_name: name,
                    threshold_value: value,
                    current_soc: soc,
                    previous_soc: previous,
                    direction: side,
                    timestamp: now,
                }));
            }
        }

        let delta = soc - state.baseline;
        if delta.abs() >= self.config.change_threshold
            && self.limiter.allow(&SignalKey::new(key, Signal::Change), now)
        {
            events.push(DerivedEvent::Change(ChangeEvent {
                device_key: key.to_string(),
                family_id: self.family_id.clone(),
                change_amount: round_tenth(delta.abs()),
                change_threshold: self.config.change_threshold,
                current_soc: soc,
                baseline_soc: state.baseline,
                direction: if delta > 0.0 {
                    ChangeDirection::Increase
                } else {
                    ChangeDirection::Decrease
                },
                timestamp: now,
            }));
            state.baseline = soc;
        }

        if let Some(limits) = limits {
            for limit_type in LimitType::ALL {
                let value = match limit_value(limits, limit_type) {
                    Some(value) => value,
                    None => continue,
                };
                if (soc - value).abs() <= self.config.limit_tolerance
                    && self
                        .limiter
                        .allow(&SignalKey::new(key, Signal::Limit(limit_type)), now)
                {
                    events.push(DerivedEvent::Limit(LimitEvent {
                        device_key: key.to_string(),
                        family_id: self.family_id.clone(),
                        limit_type,
                        limit_value: value,
                        current_soc: soc,
                        tolerance: self.config.limit_tolerance,
                        timestamp: now,
                    }));
                }
            }
        }

        events
    }

    /// Run every battery stream of a successful fast snapshot through the engine.
    ///
    /// Keys no longer present are forgotten, except those of devices that were skipped this
    /// cycle (malformed entry or failed statistics fetch).
    pub fn derive(&mut self, snapshot: &DeviceSnapshot) -> Vec<DerivedEvent> {
        let limits = snapshot.family.soc_limits.as_ref();
        let now = snapshot.fetched_at;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut skipped: BTreeSet<&str> = snapshot.skipped.iter().map(String::as_str).collect();
        let mut events = Vec::new();

        for battery in snapshot.batteries() {
            if battery.statistics.is_none() {
                log::debug!("No statistics for battery {}, SOC state kept", battery.id);
                skipped.insert(battery.id.as_str());
                continue;
            }

            let system = system_key(&battery.id);
            match battery.system_soc() {
                Ok(Some(soc)) => {
                    let reading = SocReading {
                        device_key: system.clone(),
                        soc,
                        observed_at: now,
                    };
                    events.extend(self.observe(Some(&battery.id), &reading, limits));
                }
                Ok(None) => log::debug!("No system SOC reported by battery {}", battery.id),
                Err(e) => log::warn!("Skipping SOC of {}: {}", system, e),
            }
            seen.insert(system);

            for module in battery.soc_modules() {
                let key = module_key(&battery.id, module);
                match battery.module_soc(module) {
                    Ok(Some(soc)) => {
                        let reading = SocReading {
                            device_key: key.clone(),
                            soc,
                            observed_at: now,
                        };
                        events.extend(self.observe(Some(&battery.id), &reading, None));
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("Skipping SOC of {}: {}", key, e),
                }
                seen.insert(key);
            }
        }

        let gone: Vec<String> = self
            .states
            .iter()
            .filter(|(key, state)| {
                !seen.contains(*key) && !skipped.contains(state.device_id.as_str())
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in gone {
            log::info!("{} no longer reported, dropping its SOC state", key);
            self.remove(&key);
        }

        for event in &events {
            log::debug!("Derived {} for {}", event.event_type(), event.device_key());
        }
        events
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::response::test::fixture_snapshot;
    use chrono::TimeZone;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn reading(key: &str, soc: Percent, at: i64) -> SocReading {
        SocReading {
            device_key: key.to_string(),
            soc,
            observed_at: t(at),
        }
    }

    fn no_cooldown() -> EventConfig {
        EventConfig {
            min_interval: Duration::zero(),
            ..Default::default()
        }
    }

    #[test]
    fn validation() {
        assert!(EventConfig::default().validate().is_ok());
        let unordered = EventConfig {
            low: 5.0,
            ..Default::default()
        };
        assert!(matches!(unordered.validate(), Err(Error::Configuration(_))));
        let no_change = EventConfig {
            change_threshold: 0.0,
            ..Default::default()
        };
        assert!(no_change.validate().is_err());
        assert!(SocEventEngine::new("1".to_string(), unordered).is_err());
    }

    #[test]
    fn falling_sequence() {
        let mut engine = SocEventEngine::new("34038".to_string(), no_cooldown()).unwrap();
        let key = "battery_1_system";

        let events: Vec<Vec<DerivedEvent>> = [50.0, 45.0, 38.0, 19.0]
            .iter()
            .enumerate()
            .map(|(i, soc)| engine.update(&reading(key, *soc, i as i64 * 30), None))
            .collect();

        assert!(events[0].is_empty());

        match events[1].as_slice() {
            [DerivedEvent::Change(change)] => {
                assert_eq!(ChangeDirection::Decrease, change.direction);
                assert_eq!(5.0, change.change_amount);
                assert_eq!(50.0, change.baseline_soc);
            }
            other => panic!("unexpected {:?}", other),
        }

        match events[2].as_slice() {
            [DerivedEvent::Change(change)] => assert_eq!(7.0, change.change_amount),
            other => panic!("unexpected {:?}", other),
        }

        match events[3].as_slice() {
            [DerivedEvent::Threshold(threshold), DerivedEvent::Change(change)] => {
                assert_eq!(ThresholdName::Low, threshold.threshold_name);
                assert_eq!(Side::Below, threshold.direction);
                assert_eq!(38.0, threshold.previous_soc);
                assert_eq!(19.0, change.change_amount);
                assert_eq!("34038", change.family_id);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn first_reading_is_silent() {
        let mut engine = SocEventEngine::new("1".to_string(), no_cooldown()).unwrap();
        let limits = SocLimits {
            strategy_min: Some(5.0),
            ..Default::default()
        };
        assert!(engine
            .update(&reading("battery_1_system", 5.0, 0), Some(&limits))
            .is_empty());
        let state = engine.state("battery_1_system").unwrap();
        assert_eq!(Some(&Side::Below), state.sides.get(&ThresholdName::CriticalLow));
        assert_eq!(5.0, state.baseline);
    }

    fn thresholds(events: &[DerivedEvent]) -> Vec<(ThresholdName, Side)> {
        events
            .iter()
            .filter_map(|e| match e {
                DerivedEvent::Threshold(t) => Some((t.threshold_name, t.direction)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn landing_on_breakpoint_crosses_once() {
        let mut engine = SocEventEngine::new("1".to_string(), no_cooldown()).unwrap();
        let key = "battery_1_system";

        assert!(engine.update(&reading(key, 25.0, 0), None).is_empty());
        assert_eq!(
            vec![(ThresholdName::Low, Side::Below)],
            thresholds(&engine.update(&reading(key, 20.0, 30), None))
        );
        assert!(thresholds(&engine.update(&reading(key, 20.0, 60), None)).is_empty());
        assert!(thresholds(&engine.update(&reading(key, 19.0, 90), None)).is_empty());

        assert_eq!(
            vec![(ThresholdName::Low, Side::Above)],
            thresholds(&engine.update(&reading(key, 20.0, 120), None))
        );
        assert!(thresholds(&engine.update(&reading(key, 21.0, 150), None)).is_empty());
    }

    #[test]
    fn rising_crossings_in_order() {
        let mut engine = SocEventEngine::new("1".to_string(), no_cooldown()).unwrap();
        let key = "battery_1_module2";
        engine.update(&reading(key, 5.0, 0), None);
        let events = engine.update(&reading(key, 20.0, 30), None);

        let names: Vec<ThresholdName> = events
            .iter()
            .filter_map(|e| match e {
                DerivedEvent::Threshold(t) => Some(t.threshold_name),
                _ => None,
            })
            .collect();
        /* reaching a breakpoint exactly counts as crossing it */
        assert_eq!(vec![ThresholdName::CriticalLow, ThresholdName::Low], names);
    }

    #[test]
    fn limit_proximity_rate_limited() {
        let config = EventConfig {
            change_threshold: 50.0,
            ..Default::default()
        };
        let mut engine = SocEventEngine::new("1".to_string(), config).unwrap();
        let limits = SocLimits {
            strategy_max: Some(80.0),
            ..Default::default()
        };
        let key = "battery_1_system";

        engine.update(&reading(key, 75.0, 0), Some(&limits));
        let first = engine.update(&reading(key, 79.5, 30), Some(&limits));
        match first.as_slice() {
            [DerivedEvent::Limit(limit)] => {
                assert_eq!(LimitType::StrategyMax, limit.limit_type);
                assert_eq!(80.0, limit.limit_value);
                assert_eq!(1.0, limit.tolerance);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(engine.update(&reading(key, 80.0, 60), Some(&limits)).is_empty());
        assert_eq!(1, engine.update(&reading(key, 80.5, 90), Some(&limits)).len());
    }

    #[test]
    fn suppressed_change_keeps_baseline() {
        let mut engine = SocEventEngine::new("1".to_string(), EventConfig::default()).unwrap();
        let key = "battery_1_system";

        engine.update(&reading(key, 60.0, 0), None);
        assert_eq!(1, engine.update(&reading(key, 54.0, 30), None).len());
        assert_eq!(54.0, engine.state(key).unwrap().baseline);

        /* within the cooldown: crossing suppressed, baseline unchanged */
        assert!(engine.update(&reading(key, 48.0, 45), None).is_empty());
        assert_eq!(54.0, engine.state(key).unwrap().baseline);

        match engine.update(&reading(key, 47.0, 100), None).as_slice() {
            [DerivedEvent::Change(change)] => {
                assert_eq!(54.0, change.baseline_soc);
                assert_eq!(7.0, change.change_amount);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn suppressed_threshold_still_moves_side() {
        let config = EventConfig {
            change_threshold: 50.0,
            ..Default::default()
        };
        let mut engine = SocEventEngine::new("1".to_string(), config).unwrap();
        let key = "battery_1_system";

        engine.update(&reading(key, 21.0, 0), None);
        assert_eq!(1, engine.update(&reading(key, 19.0, 10), None).len());
        assert!(engine.update(&reading(key, 21.0, 20), None).is_empty());
        assert_eq!(
            Some(&Side::Above),
            engine.state(key).unwrap().sides.get(&ThresholdName::Low)
        );
        /* no side change left to report once the cooldown ends */
        assert!(engine.update(&reading(key, 22.0, 200), None).is_empty());
    }

    #[test]
    fn out_of_range_readings_skipped() {
        let mut engine = SocEventEngine::new("1".to_string(), no_cooldown()).unwrap();
        let key = "battery_1_system";
        engine.update(&reading(key, 50.0, 0), None);
        assert!(engine.update(&reading(key, 150.0, 30), None).is_empty());
        assert!(engine.update(&reading(key, f64::NAN, 60), None).is_empty());
        assert_eq!(50.0, engine.state(key).unwrap().last_soc);
    }

    #[test]
    fn reconfigure_replaces_thresholds() {
        let mut engine = SocEventEngine::new("1".to_string(), no_cooldown()).unwrap();
        let key = "battery_1_system";
        engine.update(&reading(key, 30.0, 0), None);

        let config = EventConfig {
            low: 35.0,
            ..no_cooldown()
        };
        engine.reconfigure(config.clone()).unwrap();
        assert_eq!(&config, engine.config());
        assert_eq!(
            Some(&Side::Below),
            engine.state(key).unwrap().sides.get(&ThresholdName::Low)
        );
        /* the new breakpoint does not fire by itself */
        assert!(engine.update(&reading(key, 31.0, 30), None).is_empty());

        assert!(engine
            .reconfigure(EventConfig {
                high: 99.0,
                critical_high: 98.0,
                ..no_cooldown()
            })
            .is_err());
        assert_eq!(&config, engine.config());
    }

    #[test]
    fn derive_from_snapshot() {
        let mut engine = SocEventEngine::new("34038".to_string(), no_cooldown()).unwrap();
        let snapshot = fixture_snapshot(t(0));

        assert!(engine.derive(&snapshot).is_empty());
        let mut keys: Vec<&str> = engine.device_keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            vec![
                "battery_1003_module1",
                "battery_1003_module2",
                "battery_1003_system"
            ],
            keys
        );

        /* system SOC moves next to the strategy maximum of the fixture limits */
        let mut next = fixture_snapshot(t(30));
        let battery = next.devices.get_mut("1003").unwrap();
        if let Some(stats) = battery.statistics.as_mut() {
            stats.0.insert("batterySoc".to_string(), serde_json::json!(89.5));
        }
        let events = engine.derive(&next);
        assert!(events.iter().any(|e| matches!(e,
            DerivedEvent::Limit(l) if l.limit_type == LimitType::StrategyMax
                && l.device_key == "battery_1003_system")));
        assert!(events.iter().any(|e| matches!(e, DerivedEvent::Change(_))));
    }

    #[test]
    fn module_removal_and_reappearance() {
        let mut engine = SocEventEngine::new("34038".to_string(), no_cooldown()).unwrap();
        engine.derive(&fixture_snapshot(t(0)));
        let key = "battery_1003_module2";

        let mut without = fixture_snapshot(t(30));
        if let Some(stats) = without.devices.get_mut("1003").unwrap().statistics.as_mut() {
            stats.0.remove("battery2Soc");
        }
        engine.derive(&without);
        assert!(engine.state(key).is_none());
        assert!(engine.state("battery_1003_module1").is_some());

        /* reappearing key starts over: first reading is silent */
        let mut back = fixture_snapshot(t(60));
        if let Some(stats) = back.devices.get_mut("1003").unwrap().statistics.as_mut() {
            stats.0.insert("battery2Soc".to_string(), serde_json::json!(5));
        }
        let events = engine.derive(&back);
        assert!(events.iter().all(|e| e.device_key() != key));
        assert_eq!(5.0, engine.state(key).unwrap().last_soc);
    }

    #[test]
    fn skipped_battery_keeps_state() {
        let mut engine = SocEventEngine::new("34038".to_string(), no_cooldown()).unwrap();
        engine.derive(&fixture_snapshot(t(0)));

        let mut failed = fixture_snapshot(t(30));
        failed.devices.get_mut("1003").unwrap().statistics = None;
        engine.derive(&failed);
        assert!(engine.state("battery_1003_system").is_some());

        let mut removed = fixture_snapshot(t(60));
        removed.devices.remove("1003");
        engine.derive(&removed);
        assert_eq!(0, engine.device_keys().count());
    }

    #[test]
    fn remove_clears_rate_limiter() {
        let mut engine = SocEventEngine::new("1".to_string(), EventConfig::default()).unwrap();
        let key = "battery_1_system";
        engine.update(&reading(key, 50.0, 0), None);
        assert_eq!(1, engine.update(&reading(key, 40.0, 10), None).len());

        engine.remove(key);
        engine.update(&reading(key, 50.0, 20), None);
        /* fresh key: cooldown history is gone */
        assert_eq!(1, engine.update(&reading(key, 40.0, 30), None).len());
    }
}
