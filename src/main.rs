#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use deo_rs::api::{Error, PortalClient};
use deo_rs::model::{self, Credentials, Portal, Reading};
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

mod metrics;

const PORTAL_URL: &str = "https://portal.distributieoltenia.ro";
/* Readings change a few times a month; polling more often only burdens the portal */
const DEFAULT_INTERVAL_SECS: i64 = 6 * 60 * 60;
const DEFAULT_TIMEOUT_SECS: i64 = 30;

#[derive(Clone, serde::Deserialize)]
pub struct DeoConfig {
    base_url: String,
    email: String,
    password: String,
    token: Option<String>,
    pod: Option<String>,
    interval: u64,
    timeout: u64,
    cache_token: bool,
}

/// The portal client is blocking and owns a single session; requests take turns on it.
pub type SharedClient = Arc<Mutex<PortalClient>>;

/// Structure containing state for API handlers.
pub struct StateData {
    client: SharedClient,
    interval: u64,
    /// Timestamp of last collection attempt via `metrics::collect()`
    timestamp: Mutex<Option<Instant>>,
    /// Readings of the last successful collection
    readings: Mutex<Vec<Reading>>,
}

impl StateData {
    /// Updates `timestamp` to `now()`.
    fn touch(&self) {
        if let Ok(mut ts) = self.timestamp.lock() {
            *ts = Some(Instant::now());
        } else {
            log::trace!("Unable to lock timestamp mutex, will refresh again")
        }
    }

    /// Checks whether `interval_seconds` elapsed since last `touch()`
    fn interval_elapsed(&self, interval_secs: u64) -> bool {
        let elapsed_opt = self
            .timestamp
            .lock()
            .ok()
            .and_then(|a| a.map(|b| b.elapsed().as_secs()));

        if let Some(elapsed) = elapsed_opt {
            elapsed > interval_secs
        } else {
            /* If there is None timestamp/elapsed, always return true to trigger action */
            true
        }
    }

    fn store(&self, readings: Vec<Reading>) {
        match self.readings.lock() {
            Ok(mut stored) => *stored = readings,
            Err(_) => log::error!("Unable to lock readings mutex, keeping previous readings"),
        }
    }
}

pub fn read_settings() -> Result<DeoConfig, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .merge(config::Environment::with_prefix("DEO"))?
        .set_default("base_url", PORTAL_URL)?
        .set_default("interval", DEFAULT_INTERVAL_SECS)?
        .set_default("timeout", DEFAULT_TIMEOUT_SECS)?
        .set_default("cache_token", false)?;

    settings.try_into()
}

/// Build the client and log in once. Runs on a blocking worker.
async fn setup(settings: DeoConfig) -> Result<PortalClient, Error> {
    tokio::task::spawn_blocking(move || -> Result<PortalClient, Error> {
        let mut portal = Portal::new(settings.base_url);
        portal.cache_token = settings.cache_token;
        let credentials = Credentials::new(settings.email, settings.password)
            .with_token(settings.token)
            .with_pod(settings.pod);

        let mut client =
            PortalClient::new(portal, credentials, Duration::from_secs(settings.timeout))?;
        client.establish_session()?;
        Ok(client)
    })
    .await
    .map_err(|e| Error::InternalError(format!("setup task failed: {}", e)))?
}

#[get("/metrics")]
async fn metrics_route(state: &State<StateData>) -> Result<String, Error> {
    if state.interval_elapsed(state.interval) {
        match metrics::collect(state.client.clone()).await {
            Ok(readings) => state.store(readings),
            Err(e) => log::warn!("Readings unavailable this cycle: {}", e),
        }
        state.touch();
    } else {
        log::info!("interval time not yet elapsed since last run; returning cached result")
    }
    metrics::read()
}

#[get("/readings")]
async fn readings_route(state: &State<StateData>) -> Result<Json<Vec<Reading>>, Error> {
    let readings = state
        .readings
        .lock()
        .map_err(|_| Error::InternalError(String::from("readings lock poisoned")))?;

    Ok(Json(
        model::latest_per_sensor(&readings)
            .into_iter()
            .cloned()
            .collect(),
    ))
}

#[launch]
async fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = match read_settings() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let interval = settings.interval;

    let client = match setup(settings).await {
        Ok(client) => client,
        Err(e) => {
            log::error!("{} ({})", e.setup_message(), e);
            std::process::exit(1);
        }
    };

    let state = StateData {
        client: Arc::new(Mutex::new(client)),
        interval,
        timestamp: Mutex::new(None),
        readings: Mutex::new(Vec::new()),
    };

    rocket::build()
        .manage(state)
        .mount("/", routes![metrics_route, readings_route])
}
