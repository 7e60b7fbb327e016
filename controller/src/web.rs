use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};
use tracing::{info, warn};

use knx_thermostat_common::{
    Command, CommandKind, CommandSource, ControlError, DeviceConfig, PhysicalAddress, PidTunings,
    ProtocolAdapter, StatusSnapshot, ThermostatController, ThermostatMode,
};

use crate::store::ConfigStore;

const COMMAND_QUEUE_CAPACITY: usize = 16;
pub const CSRF_HEADER: &str = "x-csrf-token";
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// A web API command waiting for its arbitration result.
pub struct WebCommand {
    pub command: Command,
    pub reply: oneshot::Sender<bool>,
}

/// Requests that act on the controller itself rather than on the
/// arbitrated thermostat values. Drained by the control loop.
pub enum ControlRequest {
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    TunePid {
        tunings: PidTunings,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
}

impl ControlRequest {
    pub fn apply(self, controller: &mut ThermostatController) {
        match self {
            Self::SetEnabled { enabled, reply } => {
                controller.set_enabled(enabled);
                let _ = reply.send(());
            }
            Self::TunePid { tunings, reply } => {
                let _ = reply.send(controller.tune_pid(tunings));
            }
        }
    }
}

/// Latest values pushed to the web side by the protocol manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveFeed {
    pub temperature: Option<f32>,
    pub setpoint: Option<f32>,
    pub valve: Option<f32>,
    pub mode: Option<ThermostatMode>,
    pub heating: Option<bool>,
}

pub struct WebAdapter {
    inbox: mpsc::Receiver<WebCommand>,
    pending: VecDeque<oneshot::Sender<bool>>,
    live: watch::Sender<LiveFeed>,
}

impl WebAdapter {
    pub fn new() -> (Self, mpsc::Sender<WebCommand>, watch::Receiver<LiveFeed>) {
        let (commands, inbox) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (live, live_rx) = watch::channel(LiveFeed::default());
        let adapter = Self {
            inbox,
            pending: VecDeque::new(),
            live,
        };
        (adapter, commands, live_rx)
    }
}

impl ProtocolAdapter for WebAdapter {
    fn source(&self) -> CommandSource {
        CommandSource::WebApi
    }

    fn receive_commands(&mut self, _now_ms: u64) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(WebCommand { command, reply }) = self.inbox.try_recv() {
            commands.push(command);
            self.pending.push_back(reply);
        }
        commands
    }

    fn command_outcome(&mut self, _command: &Command, accepted: bool) {
        if let Some(reply) = self.pending.pop_front() {
            // The request may have been abandoned by the client.
            let _ = reply.send(accepted);
        }
    }

    fn send_temperature(&mut self, celsius: f32) {
        self.live.send_modify(|feed| feed.temperature = Some(celsius));
    }

    fn send_setpoint(&mut self, celsius: f32) {
        self.live.send_modify(|feed| feed.setpoint = Some(celsius));
    }

    fn send_valve_position(&mut self, percent: f32) {
        self.live.send_modify(|feed| feed.valve = Some(percent));
    }

    fn send_mode(&mut self, mode: ThermostatMode) {
        self.live.send_modify(|feed| feed.mode = Some(mode));
    }

    fn send_heating_state(&mut self, heating: bool) {
        self.live.send_modify(|feed| feed.heating = Some(heating));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub commands: mpsc::Sender<WebCommand>,
    pub control: mpsc::Sender<ControlRequest>,
    pub status: watch::Receiver<StatusSnapshot>,
    pub live: watch::Receiver<LiveFeed>,
    pub store: ConfigStore,
    pub shutdown: Arc<Notify>,
    /// Expected `Authorization` header; `None` leaves the API open.
    pub auth: Arc<Option<String>>,
    /// Per-boot token every mutating API request must echo in
    /// `X-CSRF-Token`.
    pub csrf_token: Arc<str>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct CsrfTokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    accepted: bool,
}

#[derive(Debug, Serialize)]
struct EnabledResponse {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct RestartResponse {
    restarting: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigView {
    device_name: String,
    update_interval: u64,
    knx_enabled: bool,
    knx_address: String,
    mqtt_enabled: bool,
    mqtt_server: String,
    mqtt_port: u16,
    mqtt_user: String,
    mqtt_password_set: bool,
    mqtt_client_id: String,
    mqtt_topic_prefix: String,
    web_user: String,
    web_password_set: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    device_name: Option<String>,
    update_interval: Option<u64>,
    knx_enabled: Option<bool>,
    knx_address: Option<String>,
    mqtt_enabled: Option<bool>,
    mqtt_server: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_user: Option<String>,
    mqtt_password: Option<String>,
    mqtt_client_id: Option<String>,
    mqtt_topic_prefix: Option<String>,
    web_user: Option<String>,
    web_password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigUpdateResponse {
    restart_required: bool,
    config: ConfigView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PidView {
    kp: f32,
    ki: f32,
    kd: f32,
    sample_interval_ms: u64,
}

pub fn router(state: AppState, web_root: PathBuf) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/csrf-token", get(handle_get_csrf_token))
        .route("/api/live", get(handle_get_live))
        .route("/api/setpoint", post(handle_set_setpoint))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/valve", post(handle_set_valve))
        .route("/api/enabled", post(handle_set_enabled))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .route("/api/pid", get(handle_get_pid).put(handle_put_pid))
        .route("/api/reboot", post(handle_reboot))
        .route("/api/factory-reset", post(handle_factory_reset))
        .fallback_service(ServeDir::new(web_root))
        .layer(middleware::from_fn_with_state(state.clone(), require_csrf))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(security_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
        .layer(security_header(header::X_FRAME_OPTIONS, "DENY"))
        .layer(security_header(header::REFERRER_POLICY, "same-origin"))
        .layer(security_header(
            header::CONTENT_SECURITY_POLICY,
            "default-src 'self'; frame-ancestors 'none'",
        ))
        .with_state(state)
}

fn security_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value))
}

pub fn generate_csrf_token() -> Arc<str> {
    Arc::from(uuid::Uuid::new_v4().simple().to_string())
}

pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{username}:{password}"))
    )
}

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth.as_deref() else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected);
    if authorized {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"thermostat\"")],
        Json(ErrorBody {
            error: "Authentication required".to_string(),
        }),
    )
        .into_response()
}

async fn require_csrf(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let mutating = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if !mutating || !request.uri().path().starts_with("/api/") {
        return next.run(request).await;
    }

    let valid = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == &*state.csrf_token);
    if valid {
        return next.run(request).await;
    }

    warn!(
        "rejected {} {} without a valid CSRF token",
        request.method(),
        request.uri().path()
    );
    error_response(StatusCode::FORBIDDEN, "Invalid CSRF token")
}

async fn handle_get_csrf_token(State(state): State<AppState>) -> impl IntoResponse {
    Json(CsrfTokenResponse {
        token: state.csrf_token.to_string(),
    })
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn handle_get_live(State(state): State<AppState>) -> impl IntoResponse {
    let live = state.live.borrow().clone();
    Json(live)
}

async fn handle_set_setpoint(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (command, accepted) = match submit(&state, CommandKind::SetTemperature, &params).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };

    if accepted {
        info!("setpoint updated to {:.1}°C", command.value);
        if let Err(err) = state
            .store
            .update(|config| config.setpoint = command.value)
            .await
        {
            warn!("failed to persist setpoint update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist setpoint",
            );
        }
    }

    Json(CommandResponse { accepted }).into_response()
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match submit(&state, CommandKind::SetMode, &params).await {
        Ok((_, accepted)) => Json(CommandResponse { accepted }).into_response(),
        Err(response) => response,
    }
}

async fn handle_set_valve(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match submit(&state, CommandKind::SetValve, &params).await {
        Ok((_, accepted)) => Json(CommandResponse { accepted }).into_response(),
        Err(response) => response,
    }
}

async fn handle_set_enabled(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(enabled) = parse_switch(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid value. Use 'on' or 'off'");
    };

    let (reply, done) = oneshot::channel();
    if state
        .control
        .send(ControlRequest::SetEnabled { enabled, reply })
        .await
        .is_err()
        || done.await.is_err()
    {
        return control_loop_unavailable();
    }

    Json(EnabledResponse { enabled }).into_response()
}

async fn handle_get_config(State(state): State<AppState>) -> Response {
    match state.store.load().await {
        Ok(config) => Json(build_config_view(&config)).into_response(),
        Err(err) => {
            warn!("failed to load config: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load configuration")
        }
    }
}

async fn handle_put_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Response {
    let knx_address = match validate_config_update(&update) {
        Ok(address) => address,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let previous = match state.store.load().await {
        Ok(config) => config,
        Err(err) => {
            warn!("failed to load config for update: {err:#}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load configuration");
        }
    };

    let updated = match state
        .store
        .update(|config| apply_config_update(config, update, knx_address))
        .await
    {
        Ok(config) => config,
        Err(err) => {
            warn!("failed to persist config update: {err:#}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save configuration");
        }
    };
    info!("configuration saved");

    Json(ConfigUpdateResponse {
        restart_required: previous.restart_required(&updated),
        config: build_config_view(&updated),
    })
    .into_response()
}

async fn handle_get_pid(State(state): State<AppState>) -> Response {
    match state.store.load().await {
        Ok(config) => Json(PidView {
            kp: config.pid.kp,
            ki: config.pid.ki,
            kd: config.pid.kd,
            sample_interval_ms: config.pid.sample_interval_ms,
        })
        .into_response(),
        Err(err) => {
            warn!("failed to load config: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load configuration")
        }
    }
}

async fn handle_put_pid(
    State(state): State<AppState>,
    Json(tunings): Json<PidTunings>,
) -> Response {
    let (reply, result) = oneshot::channel();
    if state
        .control
        .send(ControlRequest::TunePid { tunings, reply })
        .await
        .is_err()
    {
        return control_loop_unavailable();
    }

    match result.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(_) => return control_loop_unavailable(),
    }

    if let Err(err) = state
        .store
        .update(|config| {
            config.pid.kp = tunings.kp;
            config.pid.ki = tunings.ki;
            config.pid.kd = tunings.kd;
        })
        .await
    {
        warn!("failed to persist PID tunings: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist PID tunings");
    }

    Json(tunings).into_response()
}

async fn handle_reboot(State(state): State<AppState>) -> Response {
    info!("reboot requested");
    schedule_restart(&state);
    Json(RestartResponse { restarting: true }).into_response()
}

async fn handle_factory_reset(State(state): State<AppState>) -> Response {
    info!("factory reset requested");
    if let Err(err) = state.store.save(&DeviceConfig::default()).await {
        warn!("factory reset failed: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to reset configuration");
    }
    schedule_restart(&state);
    Json(RestartResponse { restarting: true }).into_response()
}

/// Lets the response go out before the control loop stops.
fn schedule_restart(state: &AppState) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(RESTART_DELAY).await;
        shutdown.notify_one();
    });
}

async fn submit(
    state: &AppState,
    kind: CommandKind,
    params: &HashMap<String, String>,
) -> Result<(Command, bool), Response> {
    let Some(value) = params.get("value") else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter"));
    };
    let command = Command::parse(CommandSource::WebApi, kind, value)
        .map_err(|err| error_response(StatusCode::BAD_REQUEST, &err.to_string()))?;

    let (reply, outcome) = oneshot::channel();
    if state
        .commands
        .send(WebCommand { command, reply })
        .await
        .is_err()
    {
        return Err(control_loop_unavailable());
    }

    match outcome.await {
        Ok(accepted) => Ok((command, accepted)),
        Err(_) => Err(control_loop_unavailable()),
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn validate_config_update(update: &ConfigUpdate) -> Result<Option<PhysicalAddress>, &'static str> {
    if update.update_interval == Some(0) {
        return Err("updateInterval must be positive");
    }
    if update.mqtt_port == Some(0) {
        return Err("mqttPort must be between 1 and 65535");
    }
    if update
        .mqtt_server
        .as_deref()
        .is_some_and(|server| server.trim().is_empty())
    {
        return Err("mqttServer cannot be empty");
    }
    if update
        .device_name
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        return Err("deviceName cannot be empty");
    }
    update
        .knx_address
        .as_deref()
        .map(str::parse::<PhysicalAddress>)
        .transpose()
        .map_err(|_| "knxAddress must be area.line.device")
}

fn apply_config_update(
    config: &mut DeviceConfig,
    update: ConfigUpdate,
    knx_address: Option<PhysicalAddress>,
) {
    if let Some(name) = update.device_name {
        config.device_name = name;
    }
    if let Some(interval) = update.update_interval {
        config.send_interval_ms = interval;
    }
    if let Some(enabled) = update.knx_enabled {
        config.knx.enabled = enabled;
    }
    if let Some(address) = knx_address {
        config.knx.physical_address = address;
    }
    if let Some(enabled) = update.mqtt_enabled {
        config.mqtt.enabled = enabled;
    }
    if let Some(server) = update.mqtt_server {
        config.mqtt.server = server;
    }
    if let Some(port) = update.mqtt_port {
        config.mqtt.port = port;
    }
    if let Some(user) = update.mqtt_user {
        config.mqtt.username = user;
    }
    if let Some(password) = update.mqtt_password {
        config.mqtt.password = password;
    }
    if let Some(client_id) = update.mqtt_client_id {
        config.mqtt.client_id = client_id;
    }
    if let Some(prefix) = update.mqtt_topic_prefix {
        config.mqtt.topic_prefix = prefix;
    }
    if let Some(user) = update.web_user {
        config.web.username = user;
    }
    if let Some(password) = update.web_password {
        config.web.password = password;
    }
}

fn build_config_view(config: &DeviceConfig) -> ConfigView {
    ConfigView {
        device_name: config.device_name.clone(),
        update_interval: config.send_interval_ms,
        knx_enabled: config.knx.enabled,
        knx_address: config.knx.physical_address.to_string(),
        mqtt_enabled: config.mqtt.enabled,
        mqtt_server: config.mqtt.server.clone(),
        mqtt_port: config.mqtt.port,
        mqtt_user: config.mqtt.username.clone(),
        mqtt_password_set: !config.mqtt.password.is_empty(),
        mqtt_client_id: config.mqtt.client_id.clone(),
        mqtt_topic_prefix: config.mqtt.topic_prefix.clone(),
        web_user: config.web.username.clone(),
        web_password_set: !config.web.password.is_empty(),
    }
}

fn control_loop_unavailable() -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "Control loop not running")
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
