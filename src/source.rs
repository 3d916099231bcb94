use crate::api::Error;
use crate::model::{DeviceListing, FamilyStatus, Statistics, StrategyEntry};
use async_trait::async_trait;

/// Read-only telemetry provider polled by the orchestrator.
///
/// Every call is fallible and safe to retry; implemented by `model::Api` for the Sunlit REST API.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn devices(&self, family_id: &str) -> Result<DeviceListing, Error>;

    async fn device_statistics(&self, device_id: &str) -> Result<Statistics, Error>;

    async fn family_status(&self, family_id: &str) -> Result<FamilyStatus, Error>;

    async fn strategy_history(&self, family_id: &str) -> Result<Vec<StrategyEntry>, Error>;
}
