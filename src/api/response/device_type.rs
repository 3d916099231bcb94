use crate::model::{DeviceStatus, DeviceType};
use serde::Deserialize;
use serde_json::Value;

impl<'de> serde::Deserialize<'de> for DeviceType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;

        Value::as_str(&value)
            .ok_or_else(|| serde::de::Error::missing_field("deviceType"))
            .map(DeviceType::from_api)
    }
}

impl<'de> serde::Deserialize<'de> for DeviceStatus {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;

        /* Seen both as "Online"/"Offline" and as 1/0 depending on the endpoint version */
        Ok(match value {
            Value::String(s) if s.eq_ignore_ascii_case("online") => DeviceStatus::Online,
            Value::String(s) if s.eq_ignore_ascii_case("offline") => DeviceStatus::Offline,
            Value::Number(n) if n.as_u64() == Some(1) => DeviceStatus::Online,
            Value::Number(n) if n.as_u64() == Some(0) => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        })
    }
}

/// Identifiers arrive as JSON numbers from the live API and as strings elsewhere.
pub fn deserialize_id<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected identifier: {}",
            other
        ))),
    }
}
