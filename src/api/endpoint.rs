pub type Endpoint = str;

pub const FAMILY_LIST: &Endpoint = "/family/list";
pub const DEVICE_LIST: &Endpoint = "/v1.2/device/list";
pub const DEVICE_STATISTICS: &Endpoint = "/v1.1/statistics/static/device";
pub const SPACE_INDEX: &Endpoint = "/v1.5/space/index";
pub const SPACE_SOC: &Endpoint = "/v1.1/space/soc";
pub const SPACE_CURRENT_STRATEGY: &Endpoint = "/v1.1/space/currentStrategy";
pub const SPACE_STRATEGY_HISTORY: &Endpoint = "/v1.1/space/strategyHistory";
pub const CHARGING_BOX_STRATEGY: &Endpoint = "/v1.6/chargingBox/checkSpaceStrategy";
