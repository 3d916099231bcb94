use crate::model::FamilyStatus;
use serde::Deserialize;

/* Sections report "NotExist" when the family has no such device */
const NOT_EXIST: &str = "NotExist";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Today {
    #[serde(rename = "yield")]
    pub daily_yield: Option<f64>,
    pub earning: Option<f64>,
    pub home_power: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battery {
    pub device_status: Option<String>,
    pub battery_level: Option<f64>,
    pub battery_count: Option<u32>,
    pub bypass: Option<bool>,
    pub charging_remaining: Option<f64>,
    pub discharging_remaining: Option<f64>,
    pub input_power: Option<f64>,
    pub output_power: Option<f64>,
    #[serde(default)]
    pub heater_status_list: Vec<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EleMeter {
    pub device_status: Option<String>,
    pub total_ac_power: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inverter {
    pub device_status: Option<String>,
    pub current_power: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoostSetting {
    pub is_on: Option<bool>,
    pub switching: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceIndex {
    pub today: Option<Today>,
    pub battery: Option<Battery>,
    pub ele_meter: Option<EleMeter>,
    pub inverter: Option<Inverter>,
    pub boost_setting: Option<BoostSetting>,
}

fn exists(device_status: &Option<String>) -> bool {
    device_status.as_deref() != Some(NOT_EXIST)
}

impl SpaceIndex {
    pub fn apply(self, family: &mut FamilyStatus) {
        if let Some(today) = self.today {
            family.daily_yield = today.daily_yield;
            family.daily_earnings = today.earning;
            family.home_power = today.home_power;
            family.currency = Some(today.currency.unwrap_or_else(|| "EUR".to_string()));
        }

        if let Some(battery) = self.battery.filter(|b| exists(&b.device_status)) {
            family.average_battery_level = battery.battery_level;
            family.battery_count = battery.battery_count;
            family.battery_bypass = Some(battery.bypass.unwrap_or(false));
            family.battery_charging_remaining = battery.charging_remaining;
            family.battery_discharging_remaining = battery.discharging_remaining;
            family.total_input_power = battery.input_power;
            family.total_output_power = battery.output_power;
            family.battery_heaters = battery.heater_status_list;
        }

        if let Some(meter) = self.ele_meter.filter(|m| exists(&m.device_status)) {
            family.meter_device_status = meter.device_status;
            family.total_ac_power = meter.total_ac_power;
        }

        if let Some(inverter) = self.inverter.filter(|i| exists(&i.device_status)) {
            family.inverter_device_status = inverter.device_status;
            family.inverter_current_power = inverter.current_power;
        }

        if let Some(boost) = self.boost_setting {
            family.boost_mode_enabled = Some(boost.is_on.unwrap_or(false));
            family.boost_mode_switching = Some(boost.switching.unwrap_or(false));
        }
    }
}
