use crate::model::ChargingBoxStrategy;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingBox {
    pub ev3600_auto_strategy_mode: Option<String>,
    pub storage_strategy: Option<String>,
    pub normal_charge_box_mode: Option<String>,
    #[serde(default)]
    pub inverter_sn: Vec<String>,
    pub ev3600_auto_strategy_exist: Option<bool>,
    pub ev3600_auto_strategy_running: Option<bool>,
    pub tariff_strategy_exist: Option<bool>,
    pub enable_local_smart_strategy: Option<bool>,
    pub ac_couple_enabled: Option<bool>,
    pub boost_on: Option<bool>,
}

impl From<ChargingBox> for ChargingBoxStrategy {
    fn from(data: ChargingBox) -> Self {
        ChargingBoxStrategy {
            ev3600_auto_strategy_mode: data.ev3600_auto_strategy_mode,
            storage_strategy: data.storage_strategy,
            normal_charge_box_mode: data.normal_charge_box_mode,
            inverter_sn_list: data.inverter_sn,
            ev3600_auto_strategy_exist: data.ev3600_auto_strategy_exist.unwrap_or(false),
            ev3600_auto_strategy_running: data.ev3600_auto_strategy_running.unwrap_or(false),
            tariff_strategy_exist: data.tariff_strategy_exist.unwrap_or(false),
            enable_local_smart_strategy: data.enable_local_smart_strategy.unwrap_or(false),
            ac_couple_enabled: data.ac_couple_enabled.unwrap_or(false),
            boost_on: data.boost_on.unwrap_or(false),
        }
    }
}
