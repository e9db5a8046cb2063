use std::{
    collections::{BTreeMap, HashMap},
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Publish, QoS};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use homectl_common::{
    controller_state_topic, notify_topic, parse_stream_topic, state_subscription, ActuatorGateway,
    Automation, ChargerConfig, ChargerController, ClimateConfig, ClimateController,
    ControllerDriver, ControllerKind, ControllerStatus, DriverInput, EntityId,
    IlluminationConfig, IlluminationController, Notification, NotificationPlanner,
    NotifierConfig, Now, RuntimeConfig, StateChange,
};

use crate::{
    api,
    gateway::{MqttGateway, TokioRetryTimer},
    store::EntityStore,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;
const CONTROLLER_QUEUE_DEPTH: usize = 64;
const DEFAULT_CONFIG_PATH: &str = "./homectl.json";

pub enum ControllerInput {
    Driver(DriverInput),
    Status(oneshot::Sender<ControllerStatus>),
}

#[derive(Clone)]
pub struct ControllerHandle {
    pub kind: ControllerKind,
    pub tx: mpsc::Sender<ControllerInput>,
}

impl ControllerHandle {
    pub async fn status(&self) -> Option<ControllerStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ControllerInput::Status(reply)).await.ok()?;
        rx.await.ok()
    }

    pub async fn send(&self, input: DriverInput) -> bool {
        self.tx.send(ControllerInput::Driver(input)).await.is_ok()
    }
}

/// Local wall clock for time-of-day lookups in the configured timezone.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    timezone: Tz,
}

impl Clock {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn now(&self) -> Now {
        Now {
            ms: monotonic_ms(),
            local: Utc::now().with_timezone(&self.timezone).naive_local(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub controllers: Arc<BTreeMap<String, ControllerHandle>>,
    pub store: EntityStore,
    pub gateway: MqttGateway,
}

impl AppState {
    pub fn notify(&self, notification: &Notification) -> homectl_common::ControlResult<()> {
        self.gateway.clone().notify(notification)
    }
}

struct MqttRouter {
    state_prefix: String,
    notify_topic: String,
    store: EntityStore,
    routes: HashMap<EntityId, Vec<mpsc::Sender<ControllerInput>>>,
    app: AppState,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("HOMECTL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut runtime = load_runtime_config(&config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    apply_env_overrides(&mut runtime);

    let timezone = runtime.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone '{}', falling back to UTC", runtime.timezone);
        Tz::UTC
    });
    let clock = Clock::new(timezone);

    let mut mqtt_options = MqttOptions::new(
        runtime.mqtt.client_id.clone(),
        runtime.mqtt.host.clone(),
        runtime.mqtt.port,
    );
    if !runtime.mqtt.user.is_empty() {
        mqtt_options.set_credentials(runtime.mqtt.user.clone(), runtime.mqtt.pass.clone());
    }
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 256);

    let store = EntityStore::new();
    let planner = match runtime.notifier.as_ref().map(NotifierConfig::from_options) {
        Some(Ok(config)) => Some(Arc::new(NotificationPlanner::new(config))),
        Some(Err(err)) => {
            error!("notifier disabled: {err}");
            None
        }
        None => None,
    };
    let gateway = MqttGateway::new(
        mqtt.clone(),
        runtime.mqtt.command_prefix.clone(),
        planner,
        store.clone(),
    );

    let mut controllers = BTreeMap::new();
    let mut routes: HashMap<EntityId, Vec<mpsc::Sender<ControllerInput>>> = HashMap::new();
    for automation in build_automations(&runtime) {
        let name = automation.name().to_string();
        if controllers.contains_key(&name) {
            error!("{name}: duplicate controller name, skipped");
            continue;
        }

        let kind = automation.kind();
        let watched = automation.watched_entities();
        let tx = spawn_controller(automation, gateway.clone(), store.clone(), clock);
        for entity in watched {
            routes.entry(entity).or_default().push(tx.clone());
        }
        info!("{name}: {} controller started", kind.as_str());
        controllers.insert(name, ControllerHandle { kind, tx });
    }
    if controllers.is_empty() {
        warn!("no controllers configured");
    }

    let app_state = AppState {
        controllers: Arc::new(controllers),
        store: store.clone(),
        gateway,
    };

    subscribe_topics(&mqtt, &runtime).await?;
    spawn_mqtt_loop(
        MqttRouter {
            state_prefix: runtime.mqtt.state_prefix.clone(),
            notify_topic: notify_topic(&runtime.mqtt.command_prefix),
            store,
            routes,
            app: app_state.clone(),
        },
        eventloop,
    );
    spawn_initialize(app_state.clone(), runtime.startup_settle_ms);
    spawn_state_publish_loop(
        app_state.clone(),
        mqtt,
        runtime.mqtt.command_prefix.clone(),
        runtime.status_publish_interval_ms,
    );

    let app = api::router(app_state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("config file {} not found, using defaults", path.display());
            Ok(RuntimeConfig::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.mqtt.host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        runtime.mqtt.port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.mqtt.user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        runtime.mqtt.pass = pass;
    }
    if let Some(port) = env_parse::<u16>("HOMECTL_HTTP_PORT") {
        runtime.http_port = port;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse::<T>().ok())
}

/// Builds every configured controller. Invalid ones are logged and skipped so
/// the rest of the house keeps running.
fn build_automations(runtime: &RuntimeConfig) -> Vec<Box<dyn Automation>> {
    let mut automations: Vec<Box<dyn Automation>> = Vec::new();

    for (name, options) in &runtime.lights {
        match IlluminationConfig::from_options(name, options) {
            Ok(config) => automations.push(Box::new(IlluminationController::new(config))),
            Err(err) => error!("{name}: illumination controller skipped: {err}"),
        }
    }
    for (name, options) in &runtime.climates {
        match ClimateConfig::from_options(name, options) {
            Ok(config) => automations.push(Box::new(ClimateController::new(config))),
            Err(err) => error!("{name}: climate controller skipped: {err}"),
        }
    }
    for (name, options) in &runtime.chargers {
        match ChargerConfig::from_options(name, options) {
            Ok(config) => automations.push(Box::new(ChargerController::new(config))),
            Err(err) => error!("{name}: charger controller skipped: {err}"),
        }
    }

    automations
}

pub(crate) fn spawn_controller(
    automation: Box<dyn Automation>,
    gateway: MqttGateway,
    store: EntityStore,
    clock: Clock,
) -> mpsc::Sender<ControllerInput> {
    let (tx, mut rx) = mpsc::channel(CONTROLLER_QUEUE_DEPTH);
    let timer = TokioRetryTimer::new(tx.clone());

    tokio::spawn(async move {
        let mut driver = ControllerDriver::new(automation, gateway, timer);
        while let Some(input) = rx.recv().await {
            let now = clock.now();
            match input {
                ControllerInput::Driver(input) => driver.handle(input, &store, &now),
                ControllerInput::Status(reply) => {
                    let _ = reply.send(driver.status(&now));
                }
            }
        }
        debug!("{}: controller task stopped", driver.automation().name());
    });

    tx
}

async fn subscribe_topics(mqtt: &AsyncClient, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let topics = [
        state_subscription(&runtime.mqtt.state_prefix),
        notify_topic(&runtime.mqtt.command_prefix),
    ];

    for topic in topics {
        mqtt.subscribe(topic.as_str(), QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

fn spawn_mqtt_loop(router: MqttRouter, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) = router.handle_message(message).await {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

impl MqttRouter {
    async fn handle_message(&self, message: Publish) -> anyhow::Result<()> {
        if message.payload.len() > MAX_MQTT_PAYLOAD_BYTES {
            warn!(
                "dropping oversized MQTT payload on topic {} ({} bytes)",
                message.topic,
                message.payload.len()
            );
            return Ok(());
        }

        let payload = std::str::from_utf8(&message.payload).context("non utf8 mqtt payload")?;

        if message.topic == self.notify_topic {
            let notification = serde_json::from_str::<Notification>(payload)
                .context("invalid notification request")?;
            self.app.notify(&notification)?;
            return Ok(());
        }

        let Some(topic) = parse_stream_topic(&self.state_prefix, &message.topic) else {
            return Ok(());
        };
        let Some(update) = self.store.apply(topic, payload) else {
            return Ok(());
        };
        // Retained messages are history, not events.
        if message.retain {
            return Ok(());
        }

        let Some(targets) = self.routes.get(&update.entity) else {
            return Ok(());
        };
        let change = StateChange {
            entity: update.entity,
            old: update.old,
            new: update.new,
            at_ms: monotonic_ms(),
        };
        debug!(
            "{} changed to {} ({} controllers)",
            change.entity,
            change.new,
            targets.len()
        );
        for tx in targets {
            let input = ControllerInput::Driver(DriverInput::StateChanged(change.clone()));
            if tx.send(input).await.is_err() {
                warn!("controller queue closed, dropping change of {}", change.entity);
            }
        }
        Ok(())
    }
}

fn spawn_initialize(app_state: AppState, settle_ms: u64) {
    tokio::spawn(async move {
        // Let retained state arrive before the first reconciliation.
        tokio::time::sleep(Duration::from_millis(settle_ms)).await;
        info!(
            "initializing controllers with {} known entities",
            app_state.store.entity_count()
        );
        for (name, handle) in app_state.controllers.iter() {
            if !handle.send(DriverInput::Initialize).await {
                warn!("{name}: controller queue closed before initialization");
            }
        }
    });
}

fn spawn_state_publish_loop(
    app_state: AppState,
    mqtt: AsyncClient,
    command_prefix: String,
    interval_ms: u64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1_000)));
        loop {
            interval.tick().await;

            for (name, handle) in app_state.controllers.iter() {
                let Some(status) = handle.status().await else {
                    continue;
                };
                match serde_json::to_vec(&status) {
                    Ok(body) => {
                        if let Err(err) = mqtt
                            .publish(
                                controller_state_topic(&command_prefix, name),
                                QoS::AtLeastOnce,
                                true,
                                body,
                            )
                            .await
                        {
                            warn!("{name}: controller state publish failed: {err}");
                        }
                    }
                    Err(err) => warn!("{name}: controller state serialization failed: {err}"),
                }
            }
        }
    });
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn runtime(value: serde_json::Value) -> RuntimeConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn invalid_controllers_are_skipped() {
        let runtime = runtime(json!({
            "lights": {
                "hall": {
                    "sensor_occupancy": "binary_sensor.hall_occupancy",
                    "light": "light.hall"
                },
                "broken": {
                    "light": "light.broken"
                }
            }
        }));

        let names: Vec<String> = build_automations(&runtime)
            .iter()
            .map(|automation| automation.name().to_string())
            .collect();

        assert_eq!(names, vec!["hall".to_string()]);
    }

    #[tokio::test]
    async fn missing_config_file_uses_defaults() {
        let runtime = load_runtime_config(Path::new("/nonexistent/homectl.json"))
            .await
            .unwrap();

        assert_eq!(runtime.http_port, 8080);
        assert!(runtime.lights.is_empty());
    }

    #[test]
    fn monotonic_clock_never_goes_back() {
        let first = monotonic_ms();
        let second = monotonic_ms();

        assert!(second >= first);
    }
}
