use crate::api::{Error, API_URL};
use crate::orchestrator::{OrchestratorConfig, TierIntervals};
use crate::soc::EventConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct TierSettings {
    pub fast_secs: u64,
    pub medium_secs: u64,
    pub slow_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnergySettings {
    pub max_gap_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSettings {
    pub enabled: bool,
    pub critical_low: f64,
    pub low: f64,
    pub high: f64,
    pub critical_high: f64,
    pub change_threshold: f64,
    pub limit_tolerance: f64,
    pub min_interval_secs: u64,
}

/// Whole seconds as a `chrono::Duration`, refusing values chrono cannot represent.
fn seconds(name: &str, secs: u64) -> Result<chrono::Duration, Error> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| Error::Configuration(format!("{} is out of range: {}", name, secs)))
}

impl TryFrom<&EventSettings> for EventConfig {
    type Error = Error;

    fn try_from(events: &EventSettings) -> Result<Self, Error> {
        Ok(EventConfig {
            critical_low: events.critical_low,
            low: events.low,
            high: events.high,
            critical_high: events.critical_high,
            change_threshold: events.change_threshold,
            limit_tolerance: events.limit_tolerance,
            min_interval: seconds("events.min_interval_secs", events.min_interval_secs)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api_url: String,
    pub access_token: String,
    pub family_id: String,
    pub request_timeout_secs: u64,
    pub tiers: TierSettings,
    pub energy: EnergySettings,
    pub events: EventSettings,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validated runtime configuration of the polling engine.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, Error> {
        if self.access_token.trim().is_empty() {
            return Err(Error::Configuration("access_token must be set".to_string()));
        }

        let config = OrchestratorConfig {
            family_id: self.family_id.trim().to_string(),
            intervals: TierIntervals {
                fast: Duration::from_secs(self.tiers.fast_secs),
                medium: Duration::from_secs(self.tiers.medium_secs),
                slow: Duration::from_secs(self.tiers.slow_secs),
            },
            request_timeout: self.request_timeout(),
            max_gap: seconds("energy.max_gap_secs", self.energy.max_gap_secs)?,
            events_enabled: self.events.enabled,
            events: EventConfig::try_from(&self.events)?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, Error> {
    let events = EventConfig::default();
    Ok(Config::builder()
        .set_default("api_url", API_URL)?
        .set_default("request_timeout_secs", 10_i64)?
        .set_default("tiers.fast_secs", 30_i64)?
        .set_default("tiers.medium_secs", 60_i64)?
        .set_default("tiers.slow_secs", 300_i64)?
        .set_default("energy.max_gap_secs", 180_i64)?
        .set_default("events.enabled", true)?
        .set_default("events.critical_low", events.critical_low)?
        .set_default("events.low", events.low)?
        .set_default("events.high", events.high)?
        .set_default("events.critical_high", events.critical_high)?
        .set_default("events.change_threshold", events.change_threshold)?
        .set_default("events.limit_tolerance", events.limit_tolerance)?
        .set_default("events.min_interval_secs", events.min_interval.num_seconds())?)
}

fn load(builder: ConfigBuilder<DefaultState>) -> Result<Settings, Error> {
    Ok(builder.build()?.try_deserialize::<Settings>()?)
}

/// Defaults, then an optional `sunlit.{toml,yaml,json}` file, then `SUNLIT_*` variables
/// (`SUNLIT_EVENTS__LOW=25` sets `events.low`).
pub fn read_settings() -> Result<Settings, Error> {
    let builder = defaults()?
        .add_source(File::with_name("sunlit").required(false))
        .add_source(
            Environment::with_prefix("SUNLIT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    load(builder)
}
