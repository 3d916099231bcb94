use super::device_type::deserialize_id;
use crate::model::Family;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub device_count: Option<u32>,
}

impl From<Data> for Family {
    fn from(data: Data) -> Self {
        Family {
            id: data.id,
            name: data.name,
            address: data.address,
            device_count: data.device_count,
        }
    }
}
