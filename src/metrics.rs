use chrono::Utc;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, TextEncoder};
use sunlit_rs::api::Error;
use sunlit_rs::energy::{Direction, EnergyReport};
use sunlit_rs::model::{DeviceSnapshot, StrategySnapshot};
use sunlit_rs::soc::{self, DerivedEvent};
use sunlit_rs::store::{SnapshotStore, Tier};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

lazy_static! {
    static ref ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "sunlit_energy_wh",
            "energy integrated from power readings since start (in Wh)",
        ),
        &["channel", "device_id", "direction"],
    )
    .unwrap();
    static ref MPPT_ENERGY_GAUGE: Gauge = register_gauge!(opts!(
        "sunlit_mppt_energy_kwh",
        "energy integrated over all MPPT inputs since start (in kWh)",
    ))
    .unwrap();
    static ref SOC_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("sunlit_soc_percent", "state of charge reported per battery stream",),
        &["device_key"],
    )
    .unwrap();
    static ref SOLAR_POWER_GAUGE: Gauge = register_gauge!(opts!(
        "sunlit_solar_power_watts",
        "current output of all micro inverters",
    ))
    .unwrap();
    static ref DEVICE_ONLINE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("sunlit_device_online", "1 if the device reports as online",),
        &["device_id", "device_type"],
    )
    .unwrap();
    static ref STRATEGY_CHANGES_GAUGE: Gauge = register_gauge!(opts!(
        "sunlit_strategy_changes_today",
        "battery strategy changes within the last 24 hours",
    ))
    .unwrap();
    static ref TIER_AGE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "sunlit_tier_age_seconds",
            "seconds since the last successful refresh of a tier",
        ),
        &["tier"],
    )
    .unwrap();
    static ref TIER_STALE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("sunlit_tier_stale", "1 if the last refresh of a tier failed",),
        &["tier"],
    )
    .unwrap();
    static ref TIER_FAILURES_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "sunlit_tier_consecutive_failures",
            "failed refreshes since the last success",
        ),
        &["tier"],
    )
    .unwrap();
    static ref EVENTS_COUNTER: IntCounterVec = register_int_counter_vec!(
        opts!("sunlit_events_total", "derived SOC events emitted",),
        &["event_type"],
    )
    .unwrap();
}

/// Feed SOC, device status and solar power of a fast tier snapshot to the registry.
fn process_devices(snapshot: &DeviceSnapshot) {
    SOC_GAUGE.reset();
    DEVICE_ONLINE_GAUGE.reset();

    for device in snapshot.devices.values() {
        DEVICE_ONLINE_GAUGE
            .with_label_values(&[&device.id, device.device_type.as_str()])
            .set(if device.is_online() { 1.0 } else { 0.0 });
    }

    for battery in snapshot.batteries() {
        if let Ok(Some(value)) = battery.system_soc() {
            SOC_GAUGE
                .with_label_values(&[&soc::system_key(&battery.id)])
                .set(value);
        }
        for module in battery.soc_modules() {
            if let Ok(Some(value)) = battery.module_soc(module) {
                SOC_GAUGE
                    .with_label_values(&[&soc::module_key(&battery.id, module)])
                    .set(value);
            }
        }
    }

    SOLAR_POWER_GAUGE.set(snapshot.aggregates.total_solar_power.unwrap_or(0.0));
}

fn process_energy(report: &EnergyReport) {
    for accumulator in &report.accumulators {
        let direction = match accumulator.direction {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        };
        ENERGY_GAUGE
            .with_label_values(&[&accumulator.channel_id, &accumulator.device_id, direction])
            .set(accumulator.energy_wh);
    }
    MPPT_ENERGY_GAUGE.set(report.total_mppt_energy_kwh);
}

fn process_strategy(strategy: &StrategySnapshot) {
    STRATEGY_CHANGES_GAUGE.set(strategy.strategy_changes_today as f64);
}

/// Failed refreshes do not notify subscribers, so tier health is sampled at read time.
fn update_tiers(store: &SnapshotStore) {
    let now = Utc::now();
    for tier in Tier::ALL {
        let status = store.status(tier, now);
        if let Some(age) = status.age_secs {
            TIER_AGE_GAUGE.with_label_values(&[tier.as_str()]).set(age);
        }
        TIER_STALE_GAUGE
            .with_label_values(&[tier.as_str()])
            .set(if status.stale { 1.0 } else { 0.0 });
        TIER_FAILURES_GAUGE
            .with_label_values(&[tier.as_str()])
            .set(status.consecutive_failures as f64);
    }
}

fn count_event(event: &DerivedEvent) {
    EVENTS_COUNTER.with_label_values(&[event.event_type()]).inc();
}

/// Follow tier notifications and derived events until `token` is cancelled.
pub async fn watch(
    store: SnapshotStore,
    mut events: broadcast::Receiver<DerivedEvent>,
    token: CancellationToken,
) {
    let mut devices = store.subscribe_devices();
    let mut energy = store.subscribe_energy();
    let mut strategy = store.subscribe_strategy();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = devices.changed() => {
                if changed.is_err() {
                    break;
                }
                let data = devices.borrow_and_update().data.clone();
                if let Some(snapshot) = data {
                    process_devices(&snapshot);
                }
            }
            changed = energy.changed() => {
                if changed.is_err() {
                    break;
                }
                let data = energy.borrow_and_update().data.clone();
                if let Some(report) = data {
                    process_energy(&report);
                }
            }
            changed = strategy.changed() => {
                if changed.is_err() {
                    break;
                }
                let data = strategy.borrow_and_update().data.clone();
                if let Some(summary) = data {
                    process_strategy(&summary);
                }
            }
            event = events.recv() => match event {
                Ok(event) => count_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Metrics fell behind, {} events not counted", missed)
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    log::debug!("Metrics watcher stopped");
}

/// Read metrics from Prometheus exporter registry.
pub fn read(store: &SnapshotStore) -> Result<String, Error> {
    update_tiers(store);

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::FormatError))?;
    String::from_utf8(buffer).or(Err(Error::FormatError))
}
