use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use multizone_common::{
    actuator_command, actuator_state_topic, button_press_topic, node_state_topic,
    parse_inbound_topic, ControlAction, EntityRef, HeatingTree, InboundTopic, NodeVerb,
    RuntimeConfig, TreeError, TreeResult, TOPIC_CMD_FILTER, TOPIC_SENSOR_FILTER,
    TOPIC_SWITCH_STATE_FILTER, TOPIC_VALVE_STATE_FILTER,
};

#[derive(Clone)]
struct AppState {
    tree: Arc<Mutex<HeatingTree>>,
    publisher: Publisher,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
enum Outbound {
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnect,
}

// Outgoing MQTT traffic goes through one task so the event loop is never
// stuck behind its own request queue. Messages are queued while the tree
// lock is held and reach the broker in that order.
#[derive(Clone)]
struct Publisher {
    sender: mpsc::UnboundedSender<Outbound>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatePayload<T> {
    #[serde(flatten)]
    state: T,
    #[serde(rename = "updatedAt")]
    updated_at: String,
}

impl<T: Serialize> StatePayload<T> {
    fn now(state: T) -> Self {
        Self {
            state,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PresetCommand {
    preset: String,
    value: f32,
}

#[derive(Debug, Serialize)]
struct PresetValue {
    node: String,
    preset: String,
    value: f32,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const MAX_IDLE_MS: u64 = 1_000;
const MQTT_REQUEST_CAPACITY: usize = 64;
const PUBLISH_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });

    let mut tree =
        HeatingTree::from_config(&runtime.system).context("invalid heating configuration")?;

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options =
        MqttOptions::new(runtime.network.client_id.clone(), mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, MQTT_REQUEST_CAPACITY);
    subscribe_topics(&mqtt).await?;

    let (publisher, outbound) = Publisher::new();
    let publisher_task = spawn_publisher(mqtt, outbound);

    let startup = tree.start(monotonic_ms());
    execute_actions(&tree, &publisher, startup);

    let app_state = AppState {
        tree: Arc::new(Mutex::new(tree)),
        publisher,
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/nodes/{name}", get(handle_get_node))
        .route("/api/nodes/{name}/demand", post(handle_set_demand))
        .route("/api/nodes/{name}/boost", post(handle_start_boost))
        .route("/api/nodes/{name}/boost/stop", post(handle_stop_boost))
        .route("/api/nodes/{name}/preset", post(handle_set_preset))
        .route("/api/nodes/{name}/presets/{preset}", get(handle_resolve_preset))
        .route("/api/nodes/{name}/mode", post(handle_select_preset))
        .route("/api/nodes/{name}/enabled", post(handle_set_enabled))
        .route("/api/actuators/{name}", get(handle_get_actuator))
        .route("/api/actuators/{name}/command", post(handle_command_actuator))
        .with_state(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    {
        let mut tree = app_state.tree.lock().await;
        let actions = tree.shutdown(monotonic_ms());
        execute_actions(&tree, &app_state.publisher, actions);
    }
    app_state.publisher.disconnect();
    match tokio::time::timeout(PUBLISH_FLUSH_TIMEOUT, publisher_task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("mqtt publisher task failed: {err}"),
        Err(_) => warn!("timed out flushing mqtt messages on shutdown"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
    info!("shutdown requested");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SWITCH_STATE_FILTER,
        TOPIC_VALVE_STATE_FILTER,
        TOPIC_SENSOR_FILTER,
        TOPIC_CMD_FILTER,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

impl Publisher {
    fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn publish(&self, topic: String, payload: impl Into<Vec<u8>>, retain: bool) {
        let message = Outbound::Publish {
            topic,
            payload: payload.into(),
            retain,
        };
        if self.sender.send(message).is_err() {
            warn!("mqtt publisher stopped, dropping message");
        }
    }

    fn disconnect(&self) {
        if self.sender.send(Outbound::Disconnect).is_err() {
            debug!("mqtt publisher already stopped");
        }
    }
}

fn spawn_publisher(
    mqtt: AsyncClient,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match message {
                Outbound::Publish {
                    topic,
                    payload,
                    retain,
                } => {
                    if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, retain, payload).await {
                        warn!("mqtt publish failed: {err}");
                    }
                }
                Outbound::Disconnect => {
                    if let Err(err) = mqtt.disconnect().await {
                        warn!("mqtt disconnect failed: {err}");
                    }
                    break;
                }
            }
        }
    })
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
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

// Sleeps until the next timer is due (at most a second) and fires it.
fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        loop {
            let deadline = { app_state.tree.lock().await.next_deadline() };
            let wait_ms = deadline
                .map(|at| at.saturating_sub(monotonic_ms()))
                .unwrap_or(MAX_IDLE_MS)
                .min(MAX_IDLE_MS);
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;

            let mut tree = app_state.tree.lock().await;
            let actions = tree.tick(monotonic_ms());
            if !actions.is_empty() {
                execute_actions(&tree, &app_state.publisher, actions);
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;

            let tree = app_state.tree.lock().await;
            let entities = tree
                .nodes()
                .iter()
                .map(|node| EntityRef::Node(node.name().to_string()))
                .chain(
                    tree.actuators()
                        .iter()
                        .map(|actuator| EntityRef::Actuator(actuator.name().to_string())),
                );
            for entity in entities {
                if let Err(err) = queue_entity_state(&tree, &app_state.publisher, &entity) {
                    warn!("state publish failed: {err:#}");
                }
            }
        }
    });
}

// Queues device commands in order, then the state of every entity that
// changed. Call with the tree lock held.
fn execute_actions(tree: &HeatingTree, publisher: &Publisher, actions: Vec<ControlAction>) {
    let mut changed: Vec<EntityRef> = Vec::new();

    for action in actions {
        match action {
            ControlAction::Switch { target, on } => {
                let (topic, payload) = actuator_command(&target, on);
                publisher.publish(topic, payload, false);
            }
            ControlAction::Press { target } => {
                publisher.publish(button_press_topic(&target), "PRESS", false);
            }
            ControlAction::StateChanged(entity) => {
                if !changed.contains(&entity) {
                    changed.push(entity);
                }
            }
        }
    }

    for entity in changed {
        if let Err(err) = queue_entity_state(tree, publisher, &entity) {
            warn!("state publish failed: {err:#}");
        }
    }
}

fn queue_entity_state(
    tree: &HeatingTree,
    publisher: &Publisher,
    entity: &EntityRef,
) -> anyhow::Result<()> {
    let (topic, body) = match entity {
        EntityRef::Node(name) => (
            node_state_topic(name),
            serde_json::to_vec(&StatePayload::now(tree.node_snapshot(name)?))?,
        ),
        EntityRef::Actuator(name) => (
            actuator_state_topic(name),
            serde_json::to_vec(&StatePayload::now(tree.actuator_snapshot(name)?))?,
        ),
    };
    publisher.publish(topic, body, true);
    Ok(())
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();
    let Some(inbound) = parse_inbound_topic(&topic) else {
        debug!("ignoring message on {topic}");
        return Ok(());
    };
    let now_ms = monotonic_ms();

    let mut tree = app_state.tree.lock().await;
    let actions = match inbound {
        InboundTopic::Feedback { target_id } => {
            let Some(on) = parse_on_off(message) else {
                debug!("{target_id}: non-binary state '{message}'");
                return Ok(());
            };
            tree.handle_feedback(target_id, on, now_ms)
        }
        InboundTopic::Sensor { source_id } => {
            tree.update_input_payload(source_id, message, now_ms)?
        }
        InboundTopic::Command { node, verb } => {
            apply_node_command(&mut tree, node, verb, message, now_ms)?
        }
    };
    execute_actions(&tree, &app_state.publisher, actions);
    Ok(())
}

fn apply_node_command(
    tree: &mut HeatingTree,
    node: &str,
    verb: NodeVerb,
    message: &str,
    now_ms: u64,
) -> anyhow::Result<Vec<ControlAction>> {
    let actions = match verb {
        NodeVerb::Demand => {
            let on = parse_on_off(message)
                .with_context(|| format!("invalid demand '{message}' for {node}"))?;
            tree.set_own_demand(node, on, now_ms)?
        }
        NodeVerb::Boost => match message.to_ascii_lowercase().as_str() {
            "off" | "stop" => tree.stop_boost(node, now_ms)?,
            "" | "on" | "start" => tree.start_boost(node, None, now_ms)?,
            seconds => {
                let seconds = seconds
                    .parse::<u64>()
                    .with_context(|| format!("invalid boost '{message}' for {node}"))?;
                tree.start_boost(node, Some(seconds), now_ms)?
            }
        },
        NodeVerb::Preset => {
            let command: PresetCommand =
                serde_json::from_str(message).context("invalid preset command")?;
            tree.set_preset(node, &command.preset, command.value, now_ms)?
        }
        NodeVerb::Mode => tree.select_preset(node, message, now_ms)?,
        NodeVerb::Enabled => {
            let enabled = parse_enabled(message)
                .with_context(|| format!("invalid enabled value '{message}' for {node}"))?;
            tree.set_enabled(node, enabled, now_ms)?
        }
    };
    Ok(actions)
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.tree.lock().await.snapshot();
    Json(StatePayload::now(snapshot))
}

async fn handle_get_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let tree = state.tree.lock().await;
    node_response(&tree, &name)
}

async fn handle_get_actuator(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let tree = state.tree.lock().await;
    actuator_response(&tree, &name)
}

async fn handle_resolve_preset(
    State(state): State<AppState>,
    Path((name, preset)): Path<(String, String)>,
) -> impl IntoResponse {
    let value = state.tree.lock().await.resolve_preset(&name, &preset);
    match value {
        Ok(value) => Json(PresetValue {
            node: name,
            preset,
            value,
        })
        .into_response(),
        Err(err) => tree_error_response(&err),
    }
}

async fn handle_set_demand(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(on) = parse_on_off(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid demand. Use 'on' or 'off'");
    };

    let mut tree = state.tree.lock().await;
    let result = tree.set_own_demand(&name, on, monotonic_ms());
    respond_with_node(&tree, &state.publisher, &name, result)
}

async fn handle_start_boost(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let seconds = match params.get("seconds") {
        Some(value) => match value.parse::<u64>() {
            Ok(seconds) => Some(seconds),
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, "Invalid 'seconds' parameter")
            }
        },
        None => None,
    };

    let mut tree = state.tree.lock().await;
    let result = tree.start_boost(&name, seconds, monotonic_ms());
    respond_with_node(&tree, &state.publisher, &name, result)
}

async fn handle_stop_boost(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let mut tree = state.tree.lock().await;
    let result = tree.stop_boost(&name, monotonic_ms());
    respond_with_node(&tree, &state.publisher, &name, result)
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(preset) = params.get("name") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'name' parameter");
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(value) = value.parse::<f32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let mut tree = state.tree.lock().await;
    let result = tree.set_preset(&name, preset, value, monotonic_ms());
    respond_with_node(&tree, &state.publisher, &name, result)
}

async fn handle_select_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(preset) = params.get("preset") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'preset' parameter");
    };

    let mut tree = state.tree.lock().await;
    let result = tree.select_preset(&name, preset, monotonic_ms());
    respond_with_node(&tree, &state.publisher, &name, result)
}

async fn handle_set_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(enabled) = parse_enabled(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid value. Use 'on', 'off' or 'inherit'",
        );
    };

    let mut tree = state.tree.lock().await;
    let result = tree.set_enabled(&name, enabled, monotonic_ms());
    respond_with_node(&tree, &state.publisher, &name, result)
}

async fn handle_command_actuator(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(on) = params.get("value").and_then(|value| parse_on_off(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid value. Use 'on' or 'off'");
    };
    let force = params
        .get("force")
        .and_then(|value| parse_on_off(value))
        .unwrap_or(false);

    let mut tree = state.tree.lock().await;
    match tree.command_actuator(&name, on, force, monotonic_ms()) {
        Ok(actions) => {
            execute_actions(&tree, &state.publisher, actions);
            actuator_response(&tree, &name)
        }
        Err(err) => tree_error_response(&err),
    }
}

fn respond_with_node(
    tree: &HeatingTree,
    publisher: &Publisher,
    name: &str,
    result: TreeResult<Vec<ControlAction>>,
) -> Response {
    match result {
        Ok(actions) => {
            execute_actions(tree, publisher, actions);
            node_response(tree, name)
        }
        Err(err) => tree_error_response(&err),
    }
}

fn node_response(tree: &HeatingTree, name: &str) -> Response {
    match tree.node_snapshot(name) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => tree_error_response(&err),
    }
}

fn actuator_response(tree: &HeatingTree, name: &str) -> Response {
    match tree.actuator_snapshot(name) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => tree_error_response(&err),
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("MULTIZONE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.multizone"));
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    "no runtime config at {}, starting with an empty system",
                    self.runtime_path.display()
                );
                Ok(RuntimeConfig::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "open" => Some(true),
        "off" | "false" | "0" | "closed" | "close" => Some(false),
        _ => None,
    }
}

fn parse_enabled(value: &str) -> Option<Option<bool>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "inherit" | "auto" => Some(None),
        other => parse_on_off(other).map(Some),
    }
}

fn tree_error_response(err: &TreeError) -> Response {
    let status = match err {
        TreeError::UnknownNode(_) | TreeError::UnknownActuator(_) | TreeError::UnknownInput(_) => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
