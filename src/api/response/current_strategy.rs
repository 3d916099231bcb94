use crate::model::FamilyStatus;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStrategy {
    pub strategy: Option<String>,
    pub battery_full: Option<bool>,
    pub rated_power: Option<f64>,
    #[serde(rename = "maxOutPutPower")]
    pub max_output_power: Option<f64>,
    pub battery_status: Option<String>,
    pub battery_device_status: Option<String>,
    pub soc_min: Option<f64>,
    pub soc_max: Option<f64>,
}

impl CurrentStrategy {
    pub fn apply(self, family: &mut FamilyStatus) {
        family.battery_strategy = self.strategy;
        family.battery_full = self.battery_full;
        family.rated_power = self.rated_power;
        family.max_output_power = self.max_output_power;
        family.battery_status = self.battery_status;
        family.battery_device_status = self.battery_device_status;
        family.current_soc_min = self.soc_min;
        family.current_soc_max = self.soc_max;
    }
}
