use crate::model::StrategyEntry;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /* milliseconds since the epoch */
    pub modify_date: Option<i64>,
    pub strategy: Option<String>,
    pub smart_strategy_mode: Option<String>,
    pub status: Option<String>,
    pub battery_status: Option<String>,
    pub soc_min: Option<f64>,
    pub soc_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyHistory {
    #[serde(default)]
    pub content: Vec<Entry>,
    pub total_elements: Option<u64>,
}

impl From<Entry> for StrategyEntry {
    fn from(entry: Entry) -> Self {
        StrategyEntry {
            modified_at: entry
                .modify_date
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            strategy: entry.strategy,
            smart_strategy_mode: entry.smart_strategy_mode,
            status: entry.status,
            battery_status: entry.battery_status,
            soc_min: entry.soc_min,
            soc_max: entry.soc_max,
        }
    }
}
