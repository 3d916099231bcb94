use crate::api::Error;
use crate::energy::EnergyIntegrator;
use crate::model::{DeviceSnapshot, FamilyStatus, StrategySnapshot};
use crate::sink::EventSink;
use crate::soc::{DerivedEvent, EventConfig, SocEventEngine};
use crate::source::TelemetrySource;
use crate::store::{self, SnapshotStore, Tier, TierWriters};
use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct TierIntervals {
    pub fast: Duration,
    pub medium: Duration,
    pub slow: Duration,
}

impl Default for TierIntervals {
    fn default() -> Self {
        TierIntervals {
            fast: Duration::from_secs(30),
            medium: Duration::from_secs(60),
            slow: Duration::from_secs(300),
        }
    }
}

impl TierIntervals {
    pub fn of(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Fast => self.fast,
            Tier::Medium => self.medium,
            Tier::Slow => self.slow,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub family_id: String,
    pub intervals: TierIntervals,
    /// Upper bound for every single upstream call.
    pub request_timeout: Duration,
    pub max_gap: chrono::Duration,
    pub events_enabled: bool,
    pub events: EventConfig,
}

impl OrchestratorConfig {
    pub fn new(family_id: String) -> OrchestratorConfig {
        OrchestratorConfig {
            family_id,
            intervals: TierIntervals::default(),
            request_timeout: Duration::from_secs(10),
            max_gap: chrono::Duration::seconds(180),
            events_enabled: true,
            events: EventConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.family_id.trim().is_empty() {
            return Err(Error::Configuration("family_id must be set".to_string()));
        }
        for tier in Tier::ALL {
            if self.intervals.of(tier).is_zero() {
                return Err(Error::Configuration(format!(
                    "{} tier interval must be positive",
                    tier
                )));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Configuration(
                "request timeout must be positive".to_string(),
            ));
        }
        if self.max_gap <= chrono::Duration::zero() {
            return Err(Error::Configuration(
                "energy max gap must be positive".to_string(),
            ));
        }
        self.events.validate()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Error> {
    mutex.lock().map_err(|_| Error::InternalError)
}

/// Drives the fast, medium and slow refresh loops and publishes their results.
pub struct Orchestrator {
    config: OrchestratorConfig,
    source: Arc<dyn TelemetrySource>,
    sink: Arc<dyn EventSink>,
    writers: TierWriters,
    store: SnapshotStore,
    energy: Mutex<EnergyIntegrator>,
    soc: Mutex<SocEventEngine>,
    /// Event configuration waiting for the next fast refresh.
    pending_events: Mutex<Option<EventConfig>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        source: Arc<dyn TelemetrySource>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Orchestrator, Error> {
        config.validate()?;
        let (writers, store) = store::new();
        let soc = SocEventEngine::new(config.family_id.clone(), config.events.clone())?;

        Ok(Orchestrator {
            energy: Mutex::new(EnergyIntegrator::new(config.max_gap)),
            soc: Mutex::new(soc),
            pending_events: Mutex::new(None),
            config,
            source,
            sink,
            writers,
            store,
        })
    }

    pub fn store(&self) -> SnapshotStore {
        self.store.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate and queue a full replacement of the event configuration. It takes effect at
    /// the start of the next fast refresh.
    pub fn reconfigure(&self, events: EventConfig) -> Result<(), Error> {
        events.validate()?;
        *lock(&self.pending_events)? = Some(events);
        Ok(())
    }

    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} took longer than {:?}",
                what, self.config.request_timeout
            ))),
        }
    }

    async fn fetch_devices(&self, previous_family: Option<FamilyStatus>) -> Result<DeviceSnapshot, Error> {
        let family_id = self.config.family_id.as_str();
        let listing = self
            .bounded("device list", self.source.devices(family_id))
            .await?;

        let mut devices = Vec::with_capacity(listing.devices.len());
        for mut device in listing.devices {
            match self
                .bounded("device statistics", self.source.device_statistics(&device.id))
                .await
            {
                Ok(statistics) => device.statistics = Some(statistics),
                Err(e) => log::warn!("No statistics for device {} this cycle: {}", device.id, e),
            }
            devices.push(device);
        }

        let family = match self
            .bounded("family status", self.source.family_status(family_id))
            .await
        {
            Ok(family) => family,
            Err(e) => {
                log::warn!("Family status unavailable, keeping previous: {}", e);
                previous_family.unwrap_or_default()
            }
        };

        Ok(DeviceSnapshot::new(Utc::now(), devices, listing.skipped, family))
    }

    fn derive_events(&self, snapshot: &DeviceSnapshot) -> Result<Vec<DerivedEvent>, Error> {
        let mut soc = lock(&self.soc)?;
        if let Some(events) = lock(&self.pending_events)?.take() {
            soc.reconfigure(events)?;
        }
        if !self.config.events_enabled {
            return Ok(Vec::new());
        }
        Ok(soc.derive(snapshot))
    }

    /// Fetch devices, statistics and family status, derive SOC events, publish.
    pub async fn refresh_fast(&self) -> Result<(), Error> {
        let previous_family = self
            .store
            .devices()
            .data
            .map(|snapshot| snapshot.family.clone());

        let result = match self.fetch_devices(previous_family).await {
            Ok(snapshot) => self
                .derive_events(&snapshot)
                .map(|events| (snapshot, events)),
            Err(e) => Err(e),
        };

        match result {
            Ok((snapshot, events)) => {
                log::debug!(
                    "Fast tier: {} devices, {} skipped, {} events",
                    snapshot.devices.len(),
                    snapshot.skipped.len(),
                    events.len()
                );
                let fetched_at = snapshot.fetched_at;
                self.writers.fast.publish(snapshot, fetched_at);
                for event in &events {
                    self.sink.emit(event);
                }
                Ok(())
            }
            Err(e) => {
                self.writers.fast.fail(&e, Utc::now());
                Err(e)
            }
        }
    }

    /// Integrate the latest published device snapshot, stale or not.
    pub async fn refresh_medium(&self) -> Result<(), Error> {
        let upstream = self.store.devices();
        let snapshot = match upstream.data {
            Some(snapshot) => snapshot,
            None => return Err(Error::NotReady),
        };
        if upstream.stale {
            log::debug!(
                "Integrating stale device snapshot from {}",
                snapshot.fetched_at
            );
        }

        let report = match lock(&self.energy) {
            Ok(mut energy) => energy.ingest(&snapshot),
            Err(e) => {
                self.writers.medium.fail(&e, Utc::now());
                return Err(e);
            }
        };
        log::debug!(
            "Medium tier: {} accumulators, {} kWh from MPPT inputs",
            report.accumulators.len(),
            report.total_mppt_energy_kwh
        );
        self.writers
            .medium
            .publish_derived(report, Utc::now(), upstream.stale);
        Ok(())
    }

    /// Fetch and summarise the strategy change history.
    pub async fn refresh_slow(&self) -> Result<(), Error> {
        let family_id = self.config.family_id.as_str();
        match self
            .bounded("strategy history", self.source.strategy_history(family_id))
            .await
        {
            Ok(entries) => {
                let now = Utc::now();
                let summary = StrategySnapshot::summarize(now, entries);
                log::debug!(
                    "Slow tier: {} strategy changes in the last 24h",
                    summary.strategy_changes_today
                );
                self.writers.slow.publish(summary, now);
                Ok(())
            }
            Err(e) => {
                self.writers.slow.fail(&e, Utc::now());
                Err(e)
            }
        }
    }

    pub async fn refresh(&self, tier: Tier) -> Result<(), Error> {
        match tier {
            Tier::Fast => self.refresh_fast().await,
            Tier::Medium => self.refresh_medium().await,
            Tier::Slow => self.refresh_slow().await,
        }
    }

    async fn tier_loop(self: Arc<Self>, tier: Tier, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.intervals.of(tier));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "{} tier polling every {:?}",
            tier,
            self.config.intervals.of(tier)
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            /* an abandoned refresh publishes nothing */
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = self.refresh(tier) => result,
            };

            match result {
                Ok(()) => {}
                Err(Error::NotReady) => log::debug!("{} tier waiting for device data", tier),
                Err(e) => {
                    let failures = self.store.status(tier, Utc::now()).consecutive_failures;
                    if e.is_transient() {
                        log::warn!("{} tier refresh failed ({} in a row): {}", tier, failures, e)
                    } else {
                        log::error!("{} tier refresh failed ({} in a row): {}", tier, failures, e)
                    }
                }
            }
        }
        log::info!("{} tier stopped", tier);
    }

    /// Run the three tiers until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let handles: Vec<_> = Tier::ALL
            .iter()
            .map(|tier| tokio::spawn(self.clone().tier_loop(*tier, token.clone())))
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Tier task ended abnormally: {}", e);
            }
        }
    }
}
