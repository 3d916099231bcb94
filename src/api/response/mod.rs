pub mod charging_box;
pub mod current_strategy;
pub mod device_list;
pub mod device_type;
pub mod family_list;
pub mod space_index;
pub mod space_soc;
pub mod strategy_history;

use serde::Deserialize;
use serde_json::Value;

/* Generic envelope shared by every endpoint; `code` is 0 on success */
#[derive(Deserialize)]
pub struct Envelope {
    pub code: i64,
    pub message: Option<Value>,
    pub content: Option<Value>,
}

impl Envelope {
    /// Messages come localised (`{"DE": "Ok"}`) or as a plain string.
    pub fn message_text(&self) -> String {
        match &self.message {
            Some(Value::String(s)) => s.to_owned(),
            Some(Value::Object(map)) => map
                .values()
                .filter_map(Value::as_str)
                .next()
                .unwrap_or("(no error message received)")
                .to_string(),
            _ => "(no error message received)".to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::model::{
        ChargingBoxStrategy, Device, DeviceSnapshot, DeviceStatus, DeviceType, FamilyStatus,
        SocLimits, Statistics, StrategyEntry,
    };
    use std::fs;
    use std::path::PathBuf;

    pub fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    pub fn read_content(filename: &str) -> Value {
        let envelope: Envelope = serde_json::from_str(&read_resource(filename)).unwrap();
        assert_eq!(0, envelope.code);
        envelope.content.unwrap()
    }

    /// Fast-tier snapshot assembled from the fixtures: the device list, statistics for the
    /// battery `1003` and the family SOC limits.
    pub fn fixture_snapshot(fetched_at: chrono::DateTime<chrono::Utc>) -> DeviceSnapshot {
        let listing = crate::api::parse_device_list(read_content("deviceList.json")).unwrap();
        let statistics = match read_content("deviceStatistics.json") {
            Value::Object(map) => Statistics(map),
            other => panic!("unexpected statistics {}", other),
        };
        let devices = listing
            .devices
            .into_iter()
            .map(|mut device| {
                if device.id == "1003" {
                    device.statistics = Some(statistics.clone());
                }
                device
            })
            .collect();

        let soc: space_soc::SpaceSoc = serde_json::from_value(read_content("spaceSoc.json")).unwrap();
        let family = FamilyStatus {
            soc_limits: Some(SocLimits::from(soc)),
            ..Default::default()
        };
        DeviceSnapshot::new(fetched_at, devices, listing.skipped, family)
    }

    #[test]
    fn api_error_message() {
        let envelope: Envelope = serde_json::from_str(&read_resource("apiError.json")).unwrap();
        assert_eq!(1, envelope.code);
        assert_eq!("Authentication failed", envelope.message_text());
        assert!(envelope.content.is_none());
    }

    #[test]
    fn family_list() {
        let content = read_content("familyList.json");
        let families: Vec<family_list::Data> = serde_json::from_value(content).unwrap();
        assert_eq!("34038", families[0].id);
        assert_eq!("Garage", families[0].name);
        assert_eq!(Some(4), families[0].device_count);
    }

    #[test]
    fn device_list_entries() {
        let content = read_content("deviceList.json");
        let entries = content["content"].as_array().unwrap();

        let devices: Vec<Result<Device, _>> = entries
            .iter()
            .map(|v| serde_json::from_value::<device_list::Data>(v.clone()).map(Device::from))
            .collect();

        let meter = devices[0].as_ref().unwrap();
        assert_eq!("1001", meter.id);
        assert_eq!(DeviceType::Meter, meter.device_type);
        assert_eq!(DeviceStatus::Online, meter.status);
        assert_eq!(Some(-350.0), meter.total_ac_power);

        let inverter = devices[1].as_ref().unwrap();
        assert_eq!(DeviceType::MicroInverter, inverter.device_type);
        assert_eq!(Some(420.0), inverter.current_power);
        assert_eq!(Some(1.25), inverter.daily_earnings);

        let battery = devices[2].as_ref().unwrap();
        assert_eq!(DeviceType::Battery, battery.device_type);
        assert_eq!(3, battery.module_count);

        /* a non-numeric power value makes only that entry unreadable */
        assert!(devices[3].is_err());

        let unknown = devices[4].as_ref().unwrap();
        assert_eq!(
            DeviceType::Unknown("EV_CHARGER".to_string()),
            unknown.device_type
        );
        assert_eq!(1, unknown.module_count);
    }

    #[test]
    fn space_soc_limits() {
        let soc: space_soc::SpaceSoc = serde_json::from_value(read_content("spaceSoc.json")).unwrap();
        let limits = SocLimits::from(soc);
        assert_eq!(Some(10.0), limits.hw_min);
        assert_eq!(Some(100.0), limits.hw_max);
        assert_eq!(Some(5.0), limits.bms_min);
        assert_eq!(Some(95.0), limits.bms_max);
        assert_eq!(Some(20.0), limits.strategy_min);
        assert_eq!(Some(90.0), limits.strategy_max);
    }

    #[test]
    fn space_index_and_strategy() {
        let mut family = FamilyStatus::default();
        let index: space_index::SpaceIndex =
            serde_json::from_value(read_content("spaceIndex.json")).unwrap();
        index.apply(&mut family);

        assert_eq!(Some(3.2), family.daily_yield);
        assert_eq!(Some(0.96), family.daily_earnings);
        assert_eq!(Some("EUR".to_string()), family.currency);
        assert_eq!(Some(76.0), family.average_battery_level);
        assert_eq!(Some(3), family.battery_count);
        assert_eq!(vec![false, true], family.battery_heaters);
        /* meter reported as NotExist */
        assert_eq!(None, family.total_ac_power);
        assert_eq!(Some("Online".to_string()), family.inverter_device_status);
        assert_eq!(Some(true), family.boost_mode_enabled);

        let strategy: current_strategy::CurrentStrategy =
            serde_json::from_value(read_content("currentStrategy.json")).unwrap();
        strategy.apply(&mut family);
        assert_eq!(Some("SmartStrategy".to_string()), family.battery_strategy);
        assert_eq!(Some(800.0), family.max_output_power);
        assert_eq!(Some(15.0), family.current_soc_min);
    }

    #[test]
    fn charging_box() {
        let data: charging_box::ChargingBox =
            serde_json::from_value(read_content("chargingBox.json")).unwrap();
        let strategy = ChargingBoxStrategy::from(data);
        assert_eq!(vec!["INV001".to_string(), "INV002".to_string()], strategy.inverter_sn_list);
        assert!(strategy.tariff_strategy_exist);
        assert!(!strategy.boost_on);
    }

    #[test]
    fn strategy_history() {
        let history: strategy_history::StrategyHistory =
            serde_json::from_value(read_content("strategyHistory.json")).unwrap();
        assert_eq!(Some(2), history.total_elements);

        let entries: Vec<StrategyEntry> = history.content.into_iter().map(StrategyEntry::from).collect();
        assert_eq!(
            Some(1757165913195),
            entries[0].modified_at.map(|t| t.timestamp_millis())
        );
        assert_eq!(Some("SmartStrategy".to_string()), entries[0].strategy);
        assert_eq!(None, entries[1].modified_at);
    }
}
