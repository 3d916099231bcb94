use crate::api::Error;
use crate::model::{Device, DeviceSnapshot, KWh, WattHours, Watts, BATTERY_UNIT_CAPACITY_WH};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Positive power; import for grid channels.
    Forward,
    /// Negated negative power; export for grid channels.
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Mppt,
    ModuleMppt,
    BatteryInput,
    BatteryOutput,
    Inverter,
    Grid,
}

impl ChannelKind {
    pub fn is_mppt(&self) -> bool {
        matches!(self, ChannelKind::Mppt | ChannelKind::ModuleMppt)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub id: String,
    pub device_id: String,
    pub kind: ChannelKind,
    pub bidirectional: bool,
    pub nominal_capacity_wh: Option<WattHours>,
}

impl Channel {
    fn battery(device_id: &str, suffix: &str, kind: ChannelKind) -> Channel {
        Channel {
            id: format!("{}:{}", device_id, suffix),
            device_id: device_id.to_string(),
            kind,
            bidirectional: false,
            nominal_capacity_wh: Some(BATTERY_UNIT_CAPACITY_WH),
        }
    }

    pub fn mppt(device_id: &str, input: u32) -> Channel {
        Channel::battery(device_id, &format!("mppt{}", input), ChannelKind::Mppt)
    }

    pub fn module_mppt(device_id: &str, module: u32) -> Channel {
        Channel::battery(
            device_id,
            &format!("module{}:mppt1", module),
            ChannelKind::ModuleMppt,
        )
    }

    pub fn battery_input(device_id: &str) -> Channel {
        Channel::battery(device_id, "input", ChannelKind::BatteryInput)
    }

    pub fn battery_output(device_id: &str) -> Channel {
        Channel::battery(device_id, "output", ChannelKind::BatteryOutput)
    }

    pub fn inverter(device_id: &str) -> Channel {
        Channel {
            id: format!("{}:ac", device_id),
            device_id: device_id.to_string(),
            kind: ChannelKind::Inverter,
            bidirectional: false,
            nominal_capacity_wh: None,
        }
    }

    pub fn grid(device_id: &str) -> Channel {
        Channel {
            id: format!("{}:grid", device_id),
            device_id: device_id.to_string(),
            kind: ChannelKind::Grid,
            bidirectional: true,
            nominal_capacity_wh: None,
        }
    }

    pub fn directions(&self) -> &'static [Direction] {
        if self.bidirectional {
            &[Direction::Forward, Direction::Reverse]
        } else {
            &[Direction::Forward]
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerSample {
    pub channel_id: String,
    /// Signed power; negative means reverse flow on bidirectional channels.
    pub power: Watts,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyAccumulator {
    pub channel_id: String,
    pub direction: Direction,
    pub cumulative_wh: WattHours,
    /// Start of the current segment, `None` after a gap or disappearance.
    pub last_sample: Option<(DateTime<Utc>, Watts)>,
    pub accumulating: bool,
    pub present: bool,
}

fn hours(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 3_600_000.0
}

impl EnergyAccumulator {
    fn new(channel_id: &str, direction: Direction) -> EnergyAccumulator {
        EnergyAccumulator {
            channel_id: channel_id.to_string(),
            direction,
            cumulative_wh: 0.0,
            last_sample: None,
            accumulating: false,
            present: false,
        }
    }

    /// Integrate up to `(at, power)`, `power` already being this direction's component.
    fn advance(&mut self, at: DateTime<Utc>, power: Watts, max_gap: Duration) {
        let power = power.max(0.0);

        if let Some((t0, p0)) = self.last_sample {
            if at <= t0 {
                return;
            }
            let dt = at - t0;
            if dt > max_gap {
                log::debug!(
                    "{} ({:?}): {}s without samples, segment restarted",
                    self.channel_id,
                    self.direction,
                    dt.num_seconds()
                );
            } else if p0 <= 0.0 {
                /* frozen */
            } else if power <= 0.0 {
                /* the drop to zero happened at the observation instant */
                self.cumulative_wh += p0 * hours(dt);
            } else {
                self.cumulative_wh += (p0 + power) / 2.0 * hours(dt);
            }
        }

        self.last_sample = Some((at, power));
        self.accumulating = power > 0.0;
        self.present = true;
    }

    fn break_segment(&mut self) {
        self.last_sample = None;
        self.accumulating = false;
        self.present = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccumulatorReport {
    pub channel_id: String,
    pub device_id: String,
    pub kind: ChannelKind,
    pub direction: Direction,
    pub energy_wh: WattHours,
    pub accumulating: bool,
    pub present: bool,
    pub nominal_capacity_wh: Option<WattHours>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceEnergy {
    /// MPPT and inverter output.
    pub produced_wh: WattHours,
    pub charged_wh: WattHours,
    pub discharged_wh: WattHours,
    pub imported_wh: WattHours,
    pub exported_wh: WattHours,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyReport {
    /// Observation time of the latest integrated snapshot.
    pub as_of: Option<DateTime<Utc>>,
    pub accumulators: Vec<AccumulatorReport>,
    pub devices: BTreeMap<String, DeviceEnergy>,
    pub total_mppt_energy_kwh: KWh,
}

/// Channels a device feeds and their current reading.
fn channel_readings(device: &Device) -> Vec<(Channel, Result<Option<Watts>, Error>)> {
    let id = device.id.as_str();
    let mut readings = Vec::new();

    if device.device_type.is_battery() {
        if device.statistics.is_some() {
            readings.push((Channel::mppt(id, 1), device.mppt_power(1)));
            readings.push((Channel::mppt(id, 2), device.mppt_power(2)));
            for module in device.present_modules() {
                readings.push((Channel::module_mppt(id, module), device.module_mppt_power(module)));
            }
        }
        readings.push((Channel::battery_input(id), device.battery_input_power()));
        readings.push((Channel::battery_output(id), device.battery_output_power()));
    } else if device.device_type.is_inverter() {
        readings.push((Channel::inverter(id), device.inverter_power()));
    } else if device.device_type.is_meter() {
        readings.push((Channel::grid(id), device.meter_power()));
    }
    readings
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Integrates power readings into monotonic per-channel energy totals.
pub struct EnergyIntegrator {
    max_gap: Duration,
    channels: BTreeMap<String, Channel>,
    accumulators: BTreeMap<(String, Direction), EnergyAccumulator>,
    as_of: Option<DateTime<Utc>>,
}

impl EnergyIntegrator {
    pub fn new(max_gap: Duration) -> EnergyIntegrator {
        EnergyIntegrator {
            max_gap,
            channels: BTreeMap::new(),
            accumulators: BTreeMap::new(),
            as_of: None,
        }
    }

    pub fn accumulator(&self, channel_id: &str, direction: Direction) -> Option<&EnergyAccumulator> {
        self.accumulators.get(&(channel_id.to_string(), direction))
    }

    pub fn record(&mut self, channel: &Channel, sample: PowerSample) {
        if !sample.power.is_finite() {
            log::warn!("Ignoring power {} for {}", sample.power, channel.id);
            return;
        }
        if !self.channels.contains_key(&channel.id) {
            log::debug!("New energy channel {}", channel.id);
            self.channels.insert(channel.id.clone(), channel.clone());
        }

        for direction in channel.directions() {
            let component = match direction {
                Direction::Forward => sample.power,
                Direction::Reverse => -sample.power,
            };
            self.accumulators
                .entry((channel.id.clone(), *direction))
                .or_insert_with(|| EnergyAccumulator::new(&channel.id, *direction))
                .advance(sample.observed_at, component, self.max_gap);
        }
    }

    /// Keep the totals of a channel that stopped reporting but break its segment.
    pub fn mark_absent(&mut self, channel_id: &str) {
        for accumulator in self
            .accumulators
            .values_mut()
            .filter(|a| a.channel_id == channel_id && a.present)
        {
            log::debug!("{} ({:?}) absent", channel_id, accumulator.direction);
            accumulator.break_segment();
        }
    }

    pub fn ingest(&mut self, snapshot: &DeviceSnapshot) -> EnergyReport {
        let observed_at = snapshot.fetched_at;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut untouched: BTreeSet<&str> = snapshot.skipped.iter().map(String::as_str).collect();

        for device in snapshot.devices.values() {
            if device.device_type.is_battery() && device.statistics.is_none() {
                untouched.insert(device.id.as_str());
            }

            for (channel, reading) in channel_readings(device) {
                seen.insert(channel.id.clone());
                match reading {
                    Ok(Some(power)) => {
                        let sample = PowerSample {
                            channel_id: channel.id.clone(),
                            power,
                            observed_at,
                        };
                        self.record(&channel, sample);
                    }
                    Ok(None) => self.mark_absent(&channel.id),
                    Err(e) => log::warn!("Skipping energy channel {}: {}", channel.id, e),
                }
            }
        }

        let gone: Vec<String> = self
            .channels
            .values()
            .filter(|c| !seen.contains(&c.id) && !untouched.contains(c.device_id.as_str()))
            .map(|c| c.id.clone())
            .collect();
        for channel_id in gone {
            self.mark_absent(&channel_id);
        }

        self.as_of = Some(self.as_of.map_or(observed_at, |t| t.max(observed_at)));
        self.report()
    }

    pub fn report(&self) -> EnergyReport {
        let mut report = EnergyReport {
            as_of: self.as_of,
            ..Default::default()
        };
        let mut mppt_wh = 0.0;

        for accumulator in self.accumulators.values() {
            let channel = match self.channels.get(&accumulator.channel_id) {
                Some(channel) => channel,
                None => continue,
            };
            let energy = accumulator.cumulative_wh;

            let totals = report.devices.entry(channel.device_id.clone()).or_default();
            match (channel.kind, accumulator.direction) {
                (ChannelKind::Mppt | ChannelKind::ModuleMppt | ChannelKind::Inverter, _) => {
                    totals.produced_wh += energy
                }
                (ChannelKind::BatteryInput, _) => totals.charged_wh += energy,
                (ChannelKind::BatteryOutput, _) => totals.discharged_wh += energy,
                (ChannelKind::Grid, Direction::Forward) => totals.imported_wh += energy,
                (ChannelKind::Grid, Direction::Reverse) => totals.exported_wh += energy,
            }
            if channel.kind.is_mppt() {
                mppt_wh += energy;
            }

            report.accumulators.push(AccumulatorReport {
                channel_id: channel.id.clone(),
                device_id: channel.device_id.clone(),
                kind: channel.kind,
                direction: accumulator.direction,
                energy_wh: energy,
                accumulating: accumulator.accumulating,
                present: accumulator.present,
                nominal_capacity_wh: channel.nominal_capacity_wh,
            });
        }

        report.total_mppt_energy_kwh = round_to(mppt_wh / 1000.0, 3);
        report
    }
}
