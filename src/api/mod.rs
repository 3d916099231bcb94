pub mod endpoint;
pub mod error;
pub mod response;

use crate::model;
use crate::source::TelemetrySource;
pub use error::Error;
use response::charging_box::ChargingBox;
use response::current_strategy::CurrentStrategy;
use response::space_index::SpaceIndex;
use response::space_soc::SpaceSoc;
use response::strategy_history::StrategyHistory;
use response::{device_list, family_list, Envelope};
use serde_json::{json, Value};

use std::time::Duration;

pub const API_URL: &str = "https://api.sunlitsolar.de/rest";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub fn api(api_url: String, access_token: String, timeout: Duration) -> Result<model::Api, Error> {
    let client = reqwest::ClientBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .or(Err(Error::InternalError))?;

    Ok(model::Api {
        api_url,
        access_token,
        client,
    })
}

/// Map transport failures and non-2xx API responses to Error
fn map_api_err(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        return Error::Timeout(error.to_string());
    }
    match error.status() {
        Some(http::StatusCode::TOO_MANY_REQUESTS) => Error::RateExceeded(error.to_string()),
        Some(http::StatusCode::UNAUTHORIZED) => Error::LoginError(error.to_string()),
        _ => Error::ApiError(error.to_string()),
    }
}

/// Unwrap the `{code, message, content}` envelope of a 2xx response. Non-zero `code` is an
/// API-level error, otherwise `content` is carried forward (`Null` when absent).
fn map_response_status(value: Value) -> Result<Value, Error> {
    let envelope = serde_json::from_value::<Envelope>(value.clone())
        .map_err(|e| Error::InvalidResponse(value.to_string(), e.to_string()))?;

    if envelope.code == 0 {
        Ok(envelope.content.unwrap_or(Value::Null))
    } else {
        Err(Error::ApiError(format!(
            "Error {}: {}",
            envelope.code,
            envelope.message_text()
        )))
    }
}

/// Identifiers are numeric on the wire whenever they look numeric.
fn id_value(id: &str) -> Value {
    id.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id))
}

async fn request(
    api: &model::Api,
    method: http::Method,
    endpoint: &endpoint::Endpoint,
    body: Option<&Value>,
) -> Result<Value, Error> {
    let url = format!("{}{}", api.api_url, endpoint);

    let request = match body {
        Some(body) => api.client.request(method, url).json(body),
        None => api.client.request(method, url),
    }
    .bearer_auth(&api.access_token);

    let response_text = request
        .send()
        .await
        .map_err(map_api_err)?
        .error_for_status()
        .map_err(map_api_err)?
        .text()
        .await
        .map_err(|e| Error::ApiError(format!("Error reading API response: {}", e)))?;

    log::trace!(
        "endpoint: {}, body: {:?}, response_text: {}",
        endpoint,
        body,
        response_text
    );

    serde_json::from_str::<Value>(&response_text)
        .map_err(|e| Error::InvalidResponse(response_text, e.to_string()))
        .and_then(map_response_status)
}

async fn post(
    api: &model::Api,
    endpoint: &endpoint::Endpoint,
    body: Value,
) -> Result<Value, Error> {
    request(api, http::Method::POST, endpoint, Some(&body)).await
}

pub async fn families(api: &model::Api) -> Result<Vec<model::Family>, Error> {
    request(api, http::Method::GET, endpoint::FAMILY_LIST, None)
        .await
        .map(serde_json::from_value::<Vec<family_list::Data>>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(|families| families.into_iter().map(model::Family::from).collect())
}

/// Split a device list into readable devices and the ids of unreadable entries.
///
/// The list arrives either paginated (`{"content": [...]}`) or as a bare array. A page
/// without a `content` array is refused rather than read as an empty family.
pub fn parse_device_list(content: Value) -> Result<model::DeviceListing, Error> {
    let entries = match content {
        Value::Array(entries) => entries,
        Value::Object(mut page) => match page.remove("content") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(Error::UnexpectedApiResponse),
        },
        Value::Null => Vec::new(),
        _ => return Err(Error::UnexpectedApiResponse),
    };

    let mut listing = model::DeviceListing::default();
    for entry in entries {
        let id = entry
            .get("deviceId")
            .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()));

        match serde_json::from_value::<device_list::Data>(entry) {
            Ok(data) => listing.devices.push(model::Device::from(data)),
            Err(e) => match id {
                Some(id) => {
                    log::warn!("Skipping malformed device entry {}: {}", id, e);
                    listing.skipped.insert(id);
                }
                None => log::warn!("Skipping device entry without deviceId: {}", e),
            },
        }
    }
    Ok(listing)
}

/// List all devices of `family_id`
pub async fn devices(api: &model::Api, family_id: &str) -> Result<model::DeviceListing, Error> {
    let body = json!({"familyId": id_value(family_id), "deviceType": "ALL"});
    let listing = parse_device_list(post(api, endpoint::DEVICE_LIST, body).await?)?;

    log::debug!(
        "Fetched {} devices ({} skipped) for family {}",
        listing.devices.len(),
        listing.skipped.len(),
        family_id
    );
    Ok(listing)
}

/// Read detailed statistics of a single device.
pub async fn device_statistics(
    api: &model::Api,
    device_id: &str,
) -> Result<model::Statistics, Error> {
    let body = json!({"deviceId": id_value(device_id)});

    match post(api, endpoint::DEVICE_STATISTICS, body).await? {
        Value::Object(map) => Ok(model::Statistics(map)),
        other => Err(Error::MalformedData(format!(
            "statistics of device {}: {}",
            device_id, other
        ))),
    }
}

pub async fn space_index(api: &model::Api, family_id: &str) -> Result<SpaceIndex, Error> {
    let body = json!({"familyId": id_value(family_id)});
    post(api, endpoint::SPACE_INDEX, body)
        .await
        .map(serde_json::from_value::<SpaceIndex>)?
        .or(Err(Error::UnexpectedApiResponse))
}

pub async fn space_soc(api: &model::Api, family_id: &str) -> Result<model::SocLimits, Error> {
    let body = json!({"spaceId": id_value(family_id)});
    post(api, endpoint::SPACE_SOC, body)
        .await
        .map(serde_json::from_value::<SpaceSoc>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(model::SocLimits::from)
}

pub async fn current_strategy(
    api: &model::Api,
    family_id: &str,
) -> Result<CurrentStrategy, Error> {
    let body = json!({"familyId": id_value(family_id)});
    post(api, endpoint::SPACE_CURRENT_STRATEGY, body)
        .await
        .map(serde_json::from_value::<CurrentStrategy>)?
        .or(Err(Error::UnexpectedApiResponse))
}

pub async fn charging_box_strategy(
    api: &model::Api,
    family_id: &str,
) -> Result<model::ChargingBoxStrategy, Error> {
    let body = json!({"spaceId": id_value(family_id)});
    post(api, endpoint::CHARGING_BOX_STRATEGY, body)
        .await
        .map(serde_json::from_value::<ChargingBox>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(model::ChargingBoxStrategy::from)
}

pub async fn strategy_history(
    api: &model::Api,
    family_id: &str,
) -> Result<Vec<model::StrategyEntry>, Error> {
    let body = json!({"familyId": id_value(family_id)});
    post(api, endpoint::SPACE_STRATEGY_HISTORY, body)
        .await
        .map(serde_json::from_value::<StrategyHistory>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(|history| {
            history
                .content
                .into_iter()
                .map(model::StrategyEntry::from)
                .collect()
        })
}

/// Collect family-level status. Each part is optional: a failing endpoint only leaves its
/// fields empty, unless every part failed.
pub async fn family_status(
    api: &model::Api,
    family_id: &str,
) -> Result<model::FamilyStatus, Error> {
    let mut family = model::FamilyStatus::default();
    let mut first_error: Option<Error> = None;
    let mut succeeded = 0;

    let note = |part: &str, error: Error, first_error: &mut Option<Error>| {
        log::debug!("Could not fetch {} for family {}: {}", part, family_id, error);
        first_error.get_or_insert(error);
    };

    match space_index(api, family_id).await {
        Ok(index) => {
            index.apply(&mut family);
            succeeded += 1;
        }
        Err(e) => note("space index", e, &mut first_error),
    }
    match space_soc(api, family_id).await {
        Ok(limits) => {
            family.soc_limits = Some(limits);
            succeeded += 1;
        }
        Err(e) => note("SOC limits", e, &mut first_error),
    }
    match current_strategy(api, family_id).await {
        Ok(strategy) => {
            strategy.apply(&mut family);
            succeeded += 1;
        }
        Err(e) => note("current strategy", e, &mut first_error),
    }
    match charging_box_strategy(api, family_id).await {
        Ok(strategy) => {
            family.charging_box = Some(strategy);
            succeeded += 1;
        }
        Err(e) => note("charging box strategy", e, &mut first_error),
    }

    match (succeeded, first_error) {
        (0, Some(error)) => Err(error),
        _ => Ok(family),
    }
}

#[async_trait::async_trait]
impl TelemetrySource for model::Api {
    async fn devices(&self, family_id: &str) -> Result<model::DeviceListing, Error> {
        devices(self, family_id).await
    }

    async fn device_statistics(&self, device_id: &str) -> Result<model::Statistics, Error> {
        device_statistics(self, device_id).await
    }

    async fn family_status(&self, family_id: &str) -> Result<model::FamilyStatus, Error> {
        family_status(self, family_id).await
    }

    async fn strategy_history(
        &self,
        family_id: &str,
    ) -> Result<Vec<model::StrategyEntry>, Error> {
        strategy_history(self, family_id).await
    }
}
