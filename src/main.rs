#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use chrono::Utc;
use rocket::fairing::AdHoc;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use sunlit_rs::api;
use sunlit_rs::model::Api;
use sunlit_rs::orchestrator::Orchestrator;
use sunlit_rs::settings::{read_settings, Settings};
use sunlit_rs::sink::{BroadcastSink, LogSink};
use sunlit_rs::store::{SnapshotStore, StoreView, Tier, TierStatus};
use tokio_util::sync::CancellationToken;

mod metrics;

/// Derived events buffered per subscriber before the slowest one starts losing them.
const EVENT_BUFFER: usize = 256;

#[derive(Serialize)]
struct Health {
    ready: bool,
    fast: TierStatus,
    medium: TierStatus,
    slow: TierStatus,
}

#[get("/snapshot")]
fn snapshot_route(store: &State<SnapshotStore>) -> Result<Json<StoreView>, api::Error> {
    store.view().map(Json)
}

#[get("/metrics")]
fn metrics_route(store: &State<SnapshotStore>) -> Result<String, api::Error> {
    metrics::read(store)
}

#[get("/health")]
fn health_route(store: &State<SnapshotStore>) -> Json<Health> {
    let now = Utc::now();
    Json(Health {
        ready: store.is_ready(),
        fast: store.status(Tier::Fast, now),
        medium: store.status(Tier::Medium, now),
        slow: store.status(Tier::Slow, now),
    })
}

/// Check the token and the configured family against the family list. Not fatal: the
/// tiers report their own failures.
async fn verify_family(api: &Api, family_id: &str) {
    match api::families(api).await {
        Ok(families) => match families.iter().find(|f| f.id == family_id) {
            Some(family) => log::info!("Polling family {} ({})", family.name, family.id),
            None => log::warn!(
                "Family {} is not among the {} families of this account",
                family_id,
                families.len()
            ),
        },
        Err(e) => log::warn!("Unable to list families: {}", e),
    }
}

fn setup(settings: &Settings, sink: BroadcastSink) -> Result<(Api, Orchestrator), api::Error> {
    let config = settings.orchestrator_config()?;
    let api = api::api(
        settings.api_url.clone(),
        settings.access_token.clone(),
        settings.request_timeout(),
    )?;
    let orchestrator = Orchestrator::new(config, Arc::new(api.clone()), Arc::new((LogSink, sink)))?;
    Ok((api, orchestrator))
}

#[launch]
async fn rocket() -> Rocket<Build> {
    env_logger::init();

    let events = BroadcastSink::new(EVENT_BUFFER);
    let (api, orchestrator) = match read_settings().and_then(|s| setup(&s, events.clone())) {
        Ok(setup) => setup,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    verify_family(&api, &orchestrator.config().family_id).await;

    let store = orchestrator.store();
    let token = CancellationToken::new();
    tokio::spawn(metrics::watch(
        store.clone(),
        events.subscribe(),
        token.clone(),
    ));
    let polling = tokio::spawn(Arc::new(orchestrator).run(token.clone()));

    rocket::build()
        .manage(store)
        .mount("/", routes![snapshot_route, metrics_route, health_route])
        .attach(AdHoc::on_shutdown("Stop polling", move |_| {
            Box::pin(async move {
                token.cancel();
                if tokio::time::timeout(Duration::from_secs(5), polling)
                    .await
                    .is_err()
                {
                    log::warn!("Polling tiers did not stop in time");
                }
            })
        }))
}
