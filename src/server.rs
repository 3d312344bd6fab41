//! Local dashboard server.
//!
//! Exposes the lifecycle operations as a small JSON API and serves the
//! embedded dashboard page. Handlers hold no state of their own; every request
//! goes through the shared `LifecycleController` on the blocking pool.

use std::io;
use std::net::SocketAddr;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::DashboardSettings;
use crate::error::DevEnvError;
use crate::lifecycle::LifecycleController;
use crate::process::ProjectStatus;

const WEB_INDEX_HTML: &str = include_str!("../web/index.html");
const WEB_STYLE_CSS: &str = include_str!("../web/style.css");
const WEB_APP_JS: &str = include_str!("../web/app.js");
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct AppState {
    controller: Arc<LifecycleController>,
}

#[derive(Debug, Serialize)]
struct ProjectsResponse {
    projects: Vec<ProjectStatus>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct NameRequest {
    #[serde(default)]
    name: String,
}

/// A failed API call, rendered as `{"error": "..."}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<DevEnvError> for ApiError {
    fn from(err: DevEnvError) -> Self {
        let status = match &err {
            DevEnvError::MissingName
            | DevEnvError::MissingCommand
            | DevEnvError::EmptyCommand
            | DevEnvError::AlreadyExists(_)
            | DevEnvError::AlreadyRunning(_)
            | DevEnvError::NotRunning(_) => StatusCode::BAD_REQUEST,
            DevEnvError::NotFound(_) => StatusCode::NOT_FOUND,
            DevEnvError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "dashboard request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Builds the dashboard router around a shared controller.
pub fn router(controller: Arc<LifecycleController>) -> Router {
    Router::new()
        .route("/api/projects", get(list_projects))
        .route("/api/projects/start", post(start_project))
        .route("/api/projects/stop", post(stop_project))
        .fallback(static_asset)
        .with_state(AppState { controller })
}

async fn run_blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&LifecycleController) -> Result<T, DevEnvError> + Send + 'static,
{
    let controller = state.controller.clone();
    tokio::task::spawn_blocking(move || op(controller.as_ref()))
        .await
        .map_err(|err| ApiError::internal(format!("lifecycle task failed: {}", err)))?
        .map_err(ApiError::from)
}

// Any body that does not carry a non-empty name is treated the same way.
fn parse_name(body: &[u8]) -> Result<String, ApiError> {
    let request: NameRequest = serde_json::from_slice(body).unwrap_or_default();
    let name = request.name.trim();
    if name.is_empty() {
        return Err(DevEnvError::MissingName.into());
    }
    Ok(name.to_string())
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<ProjectsResponse>, ApiError> {
    let projects = run_blocking(&state, |controller| controller.list_status(None)).await?;
    Ok(Json(ProjectsResponse { projects }))
}

async fn start_project(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let name = parse_name(&body)?;
    let pid = run_blocking(&state, move |controller| controller.start(&name)).await?;
    Ok(Json(MessageResponse {
        message: format!("Project started (pid {})", pid),
    }))
}

async fn stop_project(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let name = parse_name(&body)?;
    let outcome = run_blocking(&state, move |controller| controller.stop(&name)).await?;
    let message = if outcome.already_exited {
        "Project was no longer running".to_string()
    } else {
        "Project stopped".to_string()
    };
    Ok(Json(MessageResponse { message }))
}

async fn static_asset(method: Method, uri: Uri) -> Response {
    if uri.path().starts_with("/api/") {
        return ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("no API route for {}", uri.path()),
        }
        .into_response();
    }
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let (content_type, body) = match uri.path() {
        "/app.js" => ("application/javascript; charset=utf-8", WEB_APP_JS),
        "/style.css" => ("text/css; charset=utf-8", WEB_STYLE_CSS),
        _ => ("text/html; charset=utf-8", WEB_INDEX_HTML),
    };
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Starts the dashboard, or reuses one already listening on the configured port.
pub async fn run_dashboard(
    controller: Arc<LifecycleController>,
    settings: DashboardSettings,
) -> anyhow::Result<()> {
    controller.ensure_initialized()?;
    let addr = SocketAddr::new(settings.host, settings.port);
    let url = settings.url();
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            if !dashboard_is_reachable(&url).await {
                bail!(
                    "port {} is already in use by another program (try --port)",
                    settings.port
                );
            }
            println!("Dashboard is already running at {}", url);
            if settings.open_browser {
                open_browser(&url);
            }
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to bind dashboard to {}", addr))
        }
    };

    info!(%url, root = %controller.location(), "dashboard started");
    println!("Dashboard started on {}", url);
    if settings.open_browser {
        open_browser(&url);
    }
    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("dashboard server failed")?;
    info!("dashboard stopped");
    Ok(())
}

/// Whether a dev-env dashboard answers at `base_url`.
pub async fn dashboard_is_reachable(base_url: &str) -> bool {
    let Ok(client) = reqwest::Client::builder()
        .user_agent(format!("dev-env/{}", env!("CARGO_PKG_VERSION")))
        .timeout(PROBE_TIMEOUT)
        .build()
    else {
        return false;
    };
    let Ok(response) = client
        .get(format!("{}/api/projects", base_url))
        .send()
        .await
    else {
        return false;
    };
    if !response.status().is_success() {
        return false;
    }
    response
        .json::<serde_json::Value>()
        .await
        .map(|body| body.get("projects").is_some_and(|projects| projects.is_array()))
        .unwrap_or(false)
}

fn browser_command(url: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("rundll32");
        command.args(["url.dll,FileProtocolHandler", url]);
        command
    } else if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(url);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        command
    }
}

fn open_browser(url: &str) {
    let result = browser_command(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(err) = result {
        warn!(%url, error = %err, "failed to open browser");
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("received shutdown signal");
}
