use crate::model::Percent;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const EVENT_SOC_THRESHOLD: &str = "sunlit_soc_threshold";
pub const EVENT_SOC_CHANGE: &str = "sunlit_soc_change";
pub const EVENT_SOC_LIMIT: &str = "sunlit_soc_limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdName {
    CriticalLow,
    Low,
    High,
    CriticalHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    StrategyMin,
    StrategyMax,
    BmsMin,
    BmsMax,
    HwMin,
    HwMax,
}

impl LimitType {
    pub const ALL: [LimitType; 6] = [
        LimitType::StrategyMin,
        LimitType::StrategyMax,
        LimitType::BmsMin,
        LimitType::BmsMax,
        LimitType::HwMin,
        LimitType::HwMax,
    ];
}

/// Side of a breakpoint a SOC value lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Above,
    Below,
}

impl Side {
    /// Side of a value seen without a predecessor. Sitting on the breakpoint counts as above.
    pub fn of(soc: Percent, breakpoint: Percent) -> Side {
        if soc >= breakpoint {
            Side::Above
        } else {
            Side::Below
        }
    }

    /// Side after moving from `previous` to `soc`. Landing exactly on the breakpoint
    /// crosses it from whichever side the value came; staying on it keeps `prior`.
    pub fn after(previous: Percent, soc: Percent, breakpoint: Percent, prior: Side) -> Side {
        if soc > breakpoint {
            Side::Above
        } else if soc < breakpoint {
            Side::Below
        } else if previous > breakpoint {
            Side::Below
        } else if previous < breakpoint {
            Side::Above
        } else {
            prior
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdEvent {
    pub device_key: String,
    pub family_id: String,
    pub threshold_name: ThresholdName,
    pub threshold_value: Percent,
    pub current_soc: Percent,
    pub previous_soc: Percent,
    pub direction: Side,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub device_key: String,
    pub family_id: String,
    pub change_amount: Percent,
    pub change_threshold: Percent,
    pub current_soc: Percent,
    pub baseline_soc: Percent,
    pub direction: ChangeDirection,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitEvent {
    pub device_key: String,
    pub family_id: String,
    pub limit_type: LimitType,
    pub limit_value: Percent,
    pub current_soc: Percent,
    pub tolerance: Percent,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type")]
pub enum DerivedEvent {
    #[serde(rename = "sunlit_soc_threshold")]
    Threshold(ThresholdEvent),
    #[serde(rename = "sunlit_soc_change")]
    Change(ChangeEvent),
    #[serde(rename = "sunlit_soc_limit")]
    Limit(LimitEvent),
}

impl DerivedEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DerivedEvent::Threshold(_) => EVENT_SOC_THRESHOLD,
            DerivedEvent::Change(_) => EVENT_SOC_CHANGE,
            DerivedEvent::Limit(_) => EVENT_SOC_LIMIT,
        }
    }

    pub fn device_key(&self) -> &str {
        match self {
            DerivedEvent::Threshold(e) => &e.device_key,
            DerivedEvent::Change(e) => &e.device_key,
            DerivedEvent::Limit(e) => &e.device_key,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn side_of_breakpoint() {
        assert_eq!(Side::Below, Side::of(19.0, 20.0));
        assert_eq!(Side::Above, Side::of(20.0, 20.0));
        assert_eq!(Side::Above, Side::of(21.0, 20.0));

        assert_eq!(Side::Below, Side::after(25.0, 20.0, 20.0, Side::Above));
        assert_eq!(Side::Above, Side::after(19.0, 20.0, 20.0, Side::Below));
        assert_eq!(Side::Below, Side::after(20.0, 20.0, 20.0, Side::Below));
        assert_eq!(Side::Above, Side::after(20.0, 20.0, 20.0, Side::Above));
        assert_eq!(Side::Above, Side::after(20.0, 21.0, 20.0, Side::Below));
    }

    #[test]
    fn serialized_shape() {
        let event = DerivedEvent::Threshold(ThresholdEvent {
            device_key: "battery_1_system".to_string(),
            family_id: "34038".to_string(),
            threshold_name: ThresholdName::CriticalLow,
            threshold_value: 10.0,
            current_soc: 9.0,
            previous_soc: 11.0,
            direction: Side::Below,
            timestamp: Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!("sunlit_soc_threshold", value["event_type"]);
        assert_eq!("critical_low", value["threshold_name"]);
        assert_eq!("below", value["direction"]);
        assert_eq!("2025-09-06T12:00:00Z", value["timestamp"]);
        assert_eq!(EVENT_SOC_THRESHOLD, event.event_type());
    }
}
