use crate::model::SocLimits;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSoc {
    pub hw_sbms_limited_disc_soc_min: Option<f64>,
    pub hw_sbms_limited_chg_soc_max: Option<f64>,
    pub battery_bms_disc_soc_min: Option<f64>,
    pub battery_bms_chg_soc_max: Option<f64>,
    pub strategy_soc_min: Option<f64>,
    pub strategy_soc_max: Option<f64>,
}

impl From<SpaceSoc> for SocLimits {
    fn from(soc: SpaceSoc) -> Self {
        SocLimits {
            strategy_min: soc.strategy_soc_min,
            strategy_max: soc.strategy_soc_max,
            bms_min: soc.battery_bms_disc_soc_min,
            bms_max: soc.battery_bms_chg_soc_max,
            hw_min: soc.hw_sbms_limited_disc_soc_min,
            hw_max: soc.hw_sbms_limited_chg_soc_max,
        }
    }
}
