use std::{
    future::Future,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch, Notify},
    time::MissedTickBehavior,
};
use tracing::{info, warn};

use knx_thermostat_common::{
    DeviceConfig, EnvironmentReader, KnxAdapter, ProtocolAdapter, StatusSnapshot,
    ThermostatController,
};

use crate::{
    knx_bus::LoggingKnxBus,
    mqtt::MqttAdapter,
    sensor::{AbsentSensor, SimulatedEnvironment},
    store::ConfigStore,
    web::{self, AppState, ControlRequest, WebAdapter},
};

const CONTROL_QUEUE_CAPACITY: usize = 8;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::from_env();
    let config = store
        .load()
        .await
        .context("failed to load device configuration")?;
    info!("starting {}", config.device_name);

    let mut controller = ThermostatController::new(&config, environment_reader());

    let (web_adapter, commands, live) = WebAdapter::new();
    let mut adapters: Vec<Box<dyn ProtocolAdapter>> = Vec::new();
    if config.knx.enabled {
        adapters.push(Box::new(KnxAdapter::new(
            LoggingKnxBus::new(config.knx.physical_address),
            config.knx.groups.clone(),
        )));
    }
    if config.mqtt.enabled {
        adapters.push(Box::new(MqttAdapter::connect(&config.mqtt)));
    }
    adapters.push(Box::new(web_adapter));
    controller.register_adapters(adapters);
    info!(
        "{} protocol adapter(s) registered",
        controller.manager().adapter_count()
    );

    let (status_tx, status) = watch::channel(controller.snapshot());
    let (control, mut control_rx) = mpsc::channel::<ControlRequest>(CONTROL_QUEUE_CAPACITY);
    let shutdown = Arc::new(Notify::new());

    let auth = (!config.web.password.is_empty())
        .then(|| web::basic_auth_header(&config.web.username, &config.web.password));
    let app_state = AppState {
        commands,
        control,
        status,
        live,
        store,
        shutdown: shutdown.clone(),
        auth: Arc::new(auth),
        csrf_token: web::generate_csrf_token(),
    };
    let app = web::router(app_state, web_root());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.web.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;
    info!("controller listening on http://{addr}");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("http server stopped: {err}");
        }
    });

    drive(
        &mut controller,
        &mut control_rx,
        &status_tx,
        loop_interval(&config),
        &shutdown,
        tokio::signal::ctrl_c(),
    )
    .await;

    info!("controller stopping");
    Ok(())
}

/// Owns the controller until `shutdown` is notified or `stop` completes.
/// `stop` is polled across iterations, so it fires even if it resolves
/// while a tick is running.
async fn drive<F: Future>(
    controller: &mut ThermostatController,
    control_rx: &mut mpsc::Receiver<ControlRequest>,
    status_tx: &watch::Sender<StatusSnapshot>,
    period: Duration,
    shutdown: &Notify,
    stop: F,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.notified() => break,
            _ = &mut stop => break,
        }

        while let Ok(request) = control_rx.try_recv() {
            request.apply(controller);
        }
        controller.tick(monotonic_ms());
        status_tx.send_replace(controller.snapshot());
    }
}

fn environment_reader() -> Box<dyn EnvironmentReader> {
    let simulate = std::env::var("THERMOSTAT_SIMULATE_SENSOR")
        .map(|value| !matches!(value.trim(), "0" | "false" | "off"))
        .unwrap_or(true);
    if simulate {
        Box::new(SimulatedEnvironment::default())
    } else {
        warn!("no environment sensor attached; running on fallback values");
        Box::new(AbsentSensor)
    }
}

fn web_root() -> PathBuf {
    std::env::var("THERMOSTAT_WEB_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(format!("{}/web", env!("CARGO_MANIFEST_DIR"))))
}

fn loop_interval(config: &DeviceConfig) -> Duration {
    Duration::from_millis(config.loop_interval_ms.max(1))
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
