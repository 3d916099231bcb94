use super::device_type::deserialize_id;
use crate::model::{Device, DeviceStatus, DeviceType};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Earnings {
    pub earnings: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Today {
    pub current_power: Option<f64>,
    pub total_power_generation: Option<f64>,
    pub total_earnings: Option<Earnings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(deserialize_with = "deserialize_id")]
    pub device_id: String,
    pub device_sn: Option<String>,
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub status: DeviceStatus,
    pub fault: Option<bool>,
    pub off: Option<bool>,
    pub device_count: Option<u32>,
    pub battery_level: Option<f64>,
    pub input_power_total: Option<f64>,
    pub output_power_total: Option<f64>,
    pub total_ac_power: Option<f64>,
    pub daily_buy_energy: Option<f64>,
    pub daily_ret_energy: Option<f64>,
    pub total_buy_energy: Option<f64>,
    pub total_ret_energy: Option<f64>,
    pub current_power: Option<f64>,
    pub total_power_generation: Option<f64>,
    pub daily_earnings: Option<f64>,
    pub today: Option<Today>,
}

impl From<Data> for Device {
    fn from(data: Data) -> Self {
        /* Inverters report either a nested `today` block or flat fields */
        let (current_power, total_power_generation, daily_earnings) = match data.today {
            Some(today) => (
                today.current_power,
                today.total_power_generation,
                today.total_earnings.and_then(|e| e.earnings),
            ),
            None => (
                data.current_power,
                data.total_power_generation,
                data.daily_earnings,
            ),
        };

        Device {
            id: data.device_id,
            sn: data.device_sn,
            name: data.device_name,
            device_type: data.device_type,
            status: data.status,
            fault: data.fault.unwrap_or(false),
            off: data.off.unwrap_or(false),
            module_count: data.device_count.filter(|c| *c > 0).unwrap_or(1),
            battery_level: data.battery_level,
            input_power_total: data.input_power_total,
            output_power_total: data.output_power_total,
            total_ac_power: data.total_ac_power,
            current_power,
            total_power_generation,
            daily_earnings,
            daily_buy_energy: data.daily_buy_energy,
            daily_ret_energy: data.daily_ret_energy,
            total_buy_energy: data.total_buy_energy,
            total_ret_energy: data.total_ret_energy,
            statistics: None,
        }
    }
}
