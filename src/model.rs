use crate::api::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub type Watts = f64;
pub type WattHours = f64;
pub type KWh = f64;
pub type Percent = f64;

/// Nominal capacity of one battery unit (head unit or expansion module).
pub const BATTERY_UNIT_CAPACITY_WH: WattHours = 2150.0;

#[derive(Debug, Clone)]
pub struct Api {
    pub api_url: String,
    pub access_token: String,
    pub client: reqwest::Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum DeviceType {
    Meter,
    MeterPro,
    MicroInverter,
    SolarMicroInverter,
    Battery,
    Unknown(String),
}

impl DeviceType {
    pub fn from_api(raw: &str) -> DeviceType {
        match raw {
            "SHELLY_3EM_METER" => DeviceType::Meter,
            "SHELLY_PRO3EM_METER" => DeviceType::MeterPro,
            "YUNENG_MICRO_INVERTER" => DeviceType::MicroInverter,
            "SOLAR_MICRO_INVERTER" => DeviceType::SolarMicroInverter,
            "ENERGY_STORAGE_BATTERY" => DeviceType::Battery,
            other => DeviceType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::Meter => "SHELLY_3EM_METER",
            DeviceType::MeterPro => "SHELLY_PRO3EM_METER",
            DeviceType::MicroInverter => "YUNENG_MICRO_INVERTER",
            DeviceType::SolarMicroInverter => "SOLAR_MICRO_INVERTER",
            DeviceType::Battery => "ENERGY_STORAGE_BATTERY",
            DeviceType::Unknown(raw) => raw,
        }
    }

    pub fn is_meter(&self) -> bool {
        matches!(self, DeviceType::Meter | DeviceType::MeterPro)
    }

    pub fn is_inverter(&self) -> bool {
        matches!(
            self,
            DeviceType::MicroInverter | DeviceType::SolarMicroInverter
        )
    }

    pub fn is_battery(&self) -> bool {
        matches!(self, DeviceType::Battery)
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Unknown(String::new())
    }
}

impl From<DeviceType> for String {
    fn from(device_type: DeviceType) -> Self {
        device_type.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// Raw per-device statistics as returned by the statistics endpoint.
///
/// Kept untyped: the set of keys depends on the device type and on the number of battery
/// modules, and a single unreadable value must only invalidate that value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Statistics(pub Map<String, Value>);

impl Statistics {
    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).map(|v| !v.is_null()).unwrap_or(false)
    }

    /// Numeric value of `key`. Missing or null is `Ok(None)`, anything that is not a number
    /// (or a numeric string) is `Error::MalformedData`.
    pub fn number(&self, key: &str) -> Result<Option<f64>, Error> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| Error::MalformedData(format!("{}: {}", key, n))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| Error::MalformedData(format!("{}: {:?}", key, s))),
            Some(other) => Err(Error::MalformedData(format!("{}: {}", key, other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub sn: Option<String>,
    pub name: Option<String>,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub fault: bool,
    pub off: bool,
    /// Number of battery modules, including the head unit's own slot. Always >= 1.
    pub module_count: u32,
    pub battery_level: Option<Percent>,
    pub input_power_total: Option<Watts>,
    pub output_power_total: Option<Watts>,
    pub total_ac_power: Option<Watts>,
    pub current_power: Option<Watts>,
    pub total_power_generation: Option<KWh>,
    pub daily_earnings: Option<f64>,
    pub daily_buy_energy: Option<KWh>,
    pub daily_ret_energy: Option<KWh>,
    pub total_buy_energy: Option<KWh>,
    pub total_ret_energy: Option<KWh>,
    /// Present only when the detailed statistics fetch succeeded for this cycle.
    pub statistics: Option<Statistics>,
}

impl Device {
    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    /// Statistics value taking precedence over the device list value.
    fn preferred(&self, key: &str, listed: Option<f64>) -> Result<Option<f64>, Error> {
        match &self.statistics {
            Some(stats) => Ok(stats.number(key)?.or(listed)),
            None => Ok(listed),
        }
    }

    pub fn system_soc(&self) -> Result<Option<Percent>, Error> {
        self.statistics
            .as_ref()
            .map_or(Ok(None), |s| s.number("batterySoc"))
    }

    pub fn module_soc(&self, module: u32) -> Result<Option<Percent>, Error> {
        self.statistics
            .as_ref()
            .map_or(Ok(None), |s| s.number(&format!("battery{}Soc", module)))
    }

    /// Modules reporting a SOC in the current statistics, bounded by `module_count`.
    pub fn present_modules(&self) -> Vec<u32> {
        match &self.statistics {
            Some(stats) => (1..=self.module_count)
                .filter(|n| {
                    stats.contains(&format!("battery{}Soc", n))
                        || stats.contains(&format!("battery{}Mppt1InPower", n))
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Modules carrying a SOC value, bounded by `module_count`.
    pub fn soc_modules(&self) -> Vec<u32> {
        match &self.statistics {
            Some(stats) => (1..=self.module_count)
                .filter(|n| stats.contains(&format!("battery{}Soc", n)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn mppt_power(&self, input: u32) -> Result<Option<Watts>, Error> {
        self.statistics.as_ref().map_or(Ok(None), |s| {
            s.number(&format!("batteryMppt{}InPower", input))
        })
    }

    pub fn module_mppt_power(&self, module: u32) -> Result<Option<Watts>, Error> {
        self.statistics.as_ref().map_or(Ok(None), |s| {
            s.number(&format!("battery{}Mppt1InPower", module))
        })
    }

    pub fn battery_input_power(&self) -> Result<Option<Watts>, Error> {
        self.preferred("inputPowerTotal", self.input_power_total)
    }

    pub fn battery_output_power(&self) -> Result<Option<Watts>, Error> {
        self.preferred("outputPowerTotal", self.output_power_total)
    }

    pub fn inverter_power(&self) -> Result<Option<Watts>, Error> {
        self.preferred("currentPower", self.current_power)
    }

    pub fn meter_power(&self) -> Result<Option<Watts>, Error> {
        self.preferred("totalAcPower", self.total_ac_power)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceListing {
    pub devices: Vec<Device>,
    /// Ids of entries that were listed but could not be read.
    pub skipped: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub device_count: usize,
    pub online_devices: usize,
    pub offline_devices: usize,
    /// Sum of inverter output, `None` while nothing is produced.
    pub total_solar_power: Option<Watts>,
    pub total_solar_energy: KWh,
    pub total_grid_export_energy: KWh,
    pub daily_grid_export_energy: KWh,
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

impl Aggregates {
    pub fn compute<'a>(devices: impl IntoIterator<Item = &'a Device>) -> Aggregates {
        let mut aggregates = Aggregates::default();
        let mut solar_power = 0.0;

        for device in devices {
            aggregates.device_count += 1;
            match device.status {
                DeviceStatus::Online => aggregates.online_devices += 1,
                DeviceStatus::Offline => aggregates.offline_devices += 1,
                DeviceStatus::Unknown => {}
            }

            if device.device_type.is_meter() {
                aggregates.total_grid_export_energy += device.total_ret_energy.unwrap_or(0.0);
                aggregates.daily_grid_export_energy += device.daily_ret_energy.unwrap_or(0.0);
            } else if device.device_type.is_inverter() {
                /* an unreadable statistics value falls back to nothing rather than failing the sum */
                solar_power += device.inverter_power().ok().flatten().unwrap_or(0.0);
                aggregates.total_solar_energy += device.total_power_generation.unwrap_or(0.0);
            }
        }

        aggregates.total_solar_power = if solar_power > 0.0 {
            Some(solar_power)
        } else {
            None
        };
        aggregates.total_solar_energy = round_to(aggregates.total_solar_energy, 3);
        aggregates.total_grid_export_energy = round_to(aggregates.total_grid_export_energy, 2);
        aggregates.daily_grid_export_energy = round_to(aggregates.daily_grid_export_energy, 2);
        aggregates
    }
}

/// SOC limits configured for the family, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SocLimits {
    pub strategy_min: Option<Percent>,
    pub strategy_max: Option<Percent>,
    pub bms_min: Option<Percent>,
    pub bms_max: Option<Percent>,
    pub hw_min: Option<Percent>,
    pub hw_max: Option<Percent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FamilyStatus {
    pub daily_yield: Option<KWh>,
    pub daily_earnings: Option<f64>,
    pub home_power: Option<Watts>,
    pub currency: Option<String>,
    pub average_battery_level: Option<Percent>,
    pub battery_count: Option<u32>,
    pub battery_bypass: Option<bool>,
    pub battery_charging_remaining: Option<f64>,
    pub battery_discharging_remaining: Option<f64>,
    pub total_input_power: Option<Watts>,
    pub total_output_power: Option<Watts>,
    pub battery_heaters: Vec<bool>,
    pub meter_device_status: Option<String>,
    pub total_ac_power: Option<Watts>,
    pub inverter_device_status: Option<String>,
    pub inverter_current_power: Option<Watts>,
    pub boost_mode_enabled: Option<bool>,
    pub boost_mode_switching: Option<bool>,
    pub soc_limits: Option<SocLimits>,
    pub battery_strategy: Option<String>,
    pub battery_full: Option<bool>,
    pub rated_power: Option<Watts>,
    pub max_output_power: Option<Watts>,
    pub battery_status: Option<String>,
    pub battery_device_status: Option<String>,
    pub current_soc_min: Option<Percent>,
    pub current_soc_max: Option<Percent>,
    pub charging_box: Option<ChargingBoxStrategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChargingBoxStrategy {
    pub ev3600_auto_strategy_mode: Option<String>,
    pub storage_strategy: Option<String>,
    pub normal_charge_box_mode: Option<String>,
    pub inverter_sn_list: Vec<String>,
    pub ev3600_auto_strategy_exist: bool,
    pub ev3600_auto_strategy_running: bool,
    pub tariff_strategy_exist: bool,
    pub enable_local_smart_strategy: bool,
    pub ac_couple_enabled: bool,
    pub boost_on: bool,
}

/// Everything the fast tier fetched in one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub devices: BTreeMap<String, Device>,
    /// Devices listed by the API whose entry could not be read this cycle.
    pub skipped: BTreeSet<String>,
    pub aggregates: Aggregates,
    pub family: FamilyStatus,
}

impl DeviceSnapshot {
    pub fn new(
        fetched_at: DateTime<Utc>,
        devices: Vec<Device>,
        skipped: BTreeSet<String>,
        family: FamilyStatus,
    ) -> DeviceSnapshot {
        let aggregates = Aggregates::compute(&devices);
        let devices = devices
            .into_iter()
            .map(|device| (device.id.clone(), device))
            .collect();

        DeviceSnapshot {
            fetched_at,
            devices,
            skipped,
            aggregates,
            family,
        }
    }

    pub fn batteries(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.device_type.is_battery())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyEntry {
    pub modified_at: Option<DateTime<Utc>>,
    pub strategy: Option<String>,
    pub smart_strategy_mode: Option<String>,
    pub status: Option<String>,
    pub battery_status: Option<String>,
    pub soc_min: Option<Percent>,
    pub soc_max: Option<Percent>,
}

/// Number of history entries kept in the published view.
pub const STRATEGY_HISTORY_KEPT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategySnapshot {
    pub fetched_at: DateTime<Utc>,
    pub last_strategy_change: Option<DateTime<Utc>>,
    pub last_strategy_type: Option<String>,
    pub last_strategy_status: Option<String>,
    pub strategy_changes_today: usize,
    pub history: Vec<StrategyEntry>,
}

impl StrategySnapshot {
    /// Summarise history entries, newest first as returned by the API.
    pub fn summarize(fetched_at: DateTime<Utc>, entries: Vec<StrategyEntry>) -> StrategySnapshot {
        let day_ago = fetched_at - chrono::Duration::days(1);
        let latest = entries.first();

        StrategySnapshot {
            fetched_at,
            last_strategy_change: latest.and_then(|e| e.modified_at),
            last_strategy_type: latest.and_then(|e| e.strategy.clone()),
            last_strategy_status: latest.and_then(|e| e.status.clone()),
            strategy_changes_today: entries
                .iter()
                .filter(|e| e.modified_at.map(|t| t >= day_ago).unwrap_or(false))
                .count(),
            history: entries.into_iter().take(STRATEGY_HISTORY_KEPT).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Family {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub device_count: Option<u32>,
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn stats(value: Value) -> Option<Statistics> {
        match value {
            Value::Object(map) => Some(Statistics(map)),
            _ => None,
        }
    }

    #[test]
    fn statistics_numbers() {
        let s = stats(json!({"a": 1, "b": 2.5, "c": "3.5", "d": null, "e": "n/a", "f": [1]})).unwrap();
        assert_eq!(Some(1.0), s.number("a").unwrap());
        assert_eq!(Some(2.5), s.number("b").unwrap());
        assert_eq!(Some(3.5), s.number("c").unwrap());
        assert_eq!(None, s.number("d").unwrap());
        assert_eq!(None, s.number("missing").unwrap());
        assert!(s.number("e").is_err());
        assert!(s.number("f").is_err());
        assert!(!s.contains("d"));
        assert!(s.contains("a"));
    }

    #[test]
    fn present_modules_bounded_by_module_count() {
        let device = Device {
            id: "1".to_string(),
            device_type: DeviceType::Battery,
            module_count: 2,
            statistics: stats(json!({
                "batterySoc": 80,
                "battery1Soc": 81,
                "battery2Soc": 79,
                "battery3Soc": 50,
            })),
            ..Default::default()
        };
        assert_eq!(vec![1, 2], device.present_modules());
        assert_eq!(vec![1, 2], device.soc_modules());
    }

    #[test]
    fn statistics_take_precedence_over_listing() {
        let mut device = Device {
            id: "inv".to_string(),
            device_type: DeviceType::MicroInverter,
            current_power: Some(100.0),
            ..Default::default()
        };
        assert_eq!(Some(100.0), device.inverter_power().unwrap());
        device.statistics = stats(json!({"currentPower": 250}));
        assert_eq!(Some(250.0), device.inverter_power().unwrap());
        device.statistics = stats(json!({"totalYield": 3}));
        assert_eq!(Some(100.0), device.inverter_power().unwrap());
    }

    #[test]
    fn aggregates() {
        let devices = vec![
            Device {
                id: "m".to_string(),
                device_type: DeviceType::Meter,
                status: DeviceStatus::Online,
                total_ret_energy: Some(10.126),
                daily_ret_energy: Some(1.5),
                ..Default::default()
            },
            Device {
                id: "i1".to_string(),
                device_type: DeviceType::MicroInverter,
                status: DeviceStatus::Online,
                current_power: Some(300.0),
                total_power_generation: Some(100.0),
                ..Default::default()
            },
            Device {
                id: "i2".to_string(),
                device_type: DeviceType::SolarMicroInverter,
                status: DeviceStatus::Offline,
                current_power: Some(200.0),
                total_power_generation: Some(50.5),
                ..Default::default()
            },
        ];
        let aggregates = Aggregates::compute(&devices);
        assert_eq!(3, aggregates.device_count);
        assert_eq!(2, aggregates.online_devices);
        assert_eq!(1, aggregates.offline_devices);
        assert_eq!(Some(500.0), aggregates.total_solar_power);
        assert_eq!(150.5, aggregates.total_solar_energy);
        assert_eq!(10.13, aggregates.total_grid_export_energy);
        assert_eq!(1.5, aggregates.daily_grid_export_energy);

        let idle = Aggregates::compute(&devices[..1]);
        assert_eq!(None, idle.total_solar_power);
    }

    #[test]
    fn strategy_summary() {
        let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
        let entry = |hours_ago: i64, strategy: &str| StrategyEntry {
            modified_at: Some(now - chrono::Duration::hours(hours_ago)),
            strategy: Some(strategy.to_string()),
            smart_strategy_mode: None,
            status: Some("Success".to_string()),
            battery_status: None,
            soc_min: None,
            soc_max: None,
        };
        let mut entries = vec![entry(1, "SmartStrategy"), entry(5, "EnergyStorageOnly"), entry(30, "SmartStrategy")];
        for h in 0..10 {
            entries.push(entry(40 + h, "EnergyStorageOnly"));
        }

        let summary = StrategySnapshot::summarize(now, entries);
        assert_eq!(Some("SmartStrategy".to_string()), summary.last_strategy_type);
        assert_eq!(Some(now - chrono::Duration::hours(1)), summary.last_strategy_change);
        assert_eq!(2, summary.strategy_changes_today);
        assert_eq!(STRATEGY_HISTORY_KEPT, summary.history.len());
    }
}
