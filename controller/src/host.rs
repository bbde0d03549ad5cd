use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::json;
use tokio::{net::TcpListener, sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use socketsync_common::{ControllerStatus, RuntimeConfig, PATH_SOCKETS};

use crate::{
    archive,
    dispatcher::ActuatorDispatcher,
    gateway,
    reconciler::Reconciler,
    scheduler::Scheduler,
    store::{FirebaseClient, MemoryStore, RemoteStateClient},
    telemetry::TelemetryIngestWorker,
};

#[derive(Clone)]
struct AppState {
    status: watch::Receiver<ControllerStatus>,
    dispatcher: Arc<ActuatorDispatcher>,
}

pub async fn run() -> anyhow::Result<()> {
    let runtime = load_runtime_config().await;
    let log_file = PathBuf::from(&runtime.logging.file);
    init_logging(&log_file)?;

    info!("starting up");

    let timezone: Tz = runtime.timezone.parse().unwrap_or_else(|_| {
        warn!("unknown timezone {}, using UTC", runtime.timezone);
        chrono_tz::UTC
    });

    let store = build_store(&runtime).await?;
    let dispatcher = Arc::new(ActuatorDispatcher::from_config(&runtime.rf));
    let mut reconciler = Reconciler::new(&runtime.sync, store.clone(), dispatcher.clone(), timezone);

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    // Hardware is assumed to already match the last known remote state.
    let seed = reconciler.reconcile(false).await;
    info!("initial socket sync complete: {seed:?}");

    let archive_dir = PathBuf::from(&runtime.logging.archive_dir);
    if let Err(err) = archive::ensure_dir(&archive_dir).await {
        warn!("archive folder unavailable: {err:#}");
    }

    let worker = Arc::new(TelemetryIngestWorker::new(
        store.clone(),
        timezone,
        runtime.gateway.source_id.clone(),
    ));
    let gateway_task = match gateway::spawn_gateway(&runtime.gateway, worker, shutdown.clone()) {
        Ok(task) => task,
        Err(err) => {
            warn!("telemetry disabled: {err:#}");
            None
        }
    };

    let app_state = AppState {
        status: reconciler.subscribe(),
        dispatcher,
    };
    let http_task = start_status_server(app_state, runtime.http_port, shutdown.clone()).await;

    let loop_delay = Duration::from_millis(runtime.sync.loop_delay_ms);
    let mut scheduler = Scheduler::new(reconciler, loop_delay, Instant::now());
    scheduler.run(shutdown.clone()).await;

    info!("cleaning up and terminating");
    if let Some(task) = gateway_task {
        gateway::join_reader(task).await;
    }
    if let Some(task) = http_task {
        if let Err(err) = task.await {
            warn!("http server task failed: {err}");
        }
    }

    let now = Utc::now().with_timezone(&timezone);
    match archive::archive_log(&log_file, &archive_dir, &now).await {
        Ok(target) => info!("log archived to {}", target.display()),
        Err(err) => warn!("log archival failed: {err:#}"),
    }

    scheduler.finish();
    info!("controller {}", scheduler.phase().as_str());
    Ok(())
}

fn init_logging(log_file: &Path) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

async fn load_runtime_config() -> RuntimeConfig {
    let path = std::env::var("SOCKETSYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.socketsync/runtime.json"));

    // Logging is not up yet, so problems are reported on stderr.
    let mut runtime = match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw).unwrap_or_else(|err| {
            eprintln!("invalid runtime config {}: {err}", path.display());
            RuntimeConfig::default()
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => RuntimeConfig::default(),
        Err(err) => {
            eprintln!("failed to read runtime config {}: {err}", path.display());
            RuntimeConfig::default()
        }
    };

    apply_env_overrides(&mut runtime);
    runtime.sanitize();
    runtime
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(url) = std::env::var("FIREBASE_URL") {
        runtime.store.url = url;
    }
    if let Ok(secret) = std::env::var("FIREBASE_SECRET") {
        runtime.store.auth_secret = secret;
    }
    if let Ok(port) = std::env::var("GATEWAY_PORT") {
        runtime.gateway.port = port;
    }
    if let Some(baud) = std::env::var("GATEWAY_BAUD")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        runtime.gateway.baud_rate = baud;
    }
    if let Some(port) = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.http_port = port;
    }
    if let Ok(program) = std::env::var("RF_PROGRAM") {
        runtime.rf.program = program;
    }
}

async fn build_store(runtime: &RuntimeConfig) -> anyhow::Result<Arc<dyn RemoteStateClient>> {
    if !runtime.store.url.is_empty() {
        info!("using remote store at {}", runtime.store.url);
        return Ok(Arc::new(FirebaseClient::new(&runtime.store)?));
    }

    warn!("no store url configured, using in-memory store");
    let store = MemoryStore::new();
    store
        .set(
            PATH_SOCKETS,
            json!({
                "socket1": 1,
                "socket2": 1,
                "socket3": 1,
                "socket4": 1,
                "socket5": 1,
                "forceUpdate": 0,
                "rpiSyncInterval": runtime.sync.default_poll_interval_secs,
            }),
        )
        .await;
    Ok(Arc::new(store))
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!("signal detected: {signal}");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("failed to register SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

/// The status surface is optional; a bind failure leaves the controller running without it.
async fn start_status_server(
    app_state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if port == 0 {
        return None;
    }
    match spawn_http_server(app_state, port, shutdown).await {
        Ok(task) => Some(task),
        Err(err) => {
            warn!("status server disabled: {err:#}");
            None
        }
    }
}

async fn spawn_http_server(
    app_state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/rf/diagnostics", get(handle_get_rf_diagnostics))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;
    info!("status server listening on http://{addr}");

    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            warn!("status server error: {err}");
        }
    }))
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn handle_get_rf_diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.diagnostics())
}
