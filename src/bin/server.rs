//! MJPEG HTTP server: `/video` streams, `/image` captures a still.

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use crabstream::transport::mjpeg_content_type;
use crabstream::{AsyncCamera, CameraError, CameraSession, CrabStreamConfig};
use futures::StreamExt;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const INDEX_HTML: &str = r#"<html>
<head><title>CrabStream</title></head>
<body>
<h1>CrabStream</h1>
<img src="/video" />
<p><a href="/image">Capture still</a> | <a href="/status">Status</a></p>
</body>
</html>
"#;

#[derive(Clone)]
struct AppState {
    camera: AsyncCamera,
    shutdown: watch::Receiver<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crabstream::init_logging();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(CrabStreamConfig::default_path);
    let config = CrabStreamConfig::load_layered(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let session = CameraSession::from_config(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        camera: AsyncCamera::from_config(session.clone(), &config),
        shutdown: shutdown_rx,
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/video", get(video))
        .route("/image", get(image))
        .route("/status", get(status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    log::info!(
        "Serving {} camera on http://{}",
        session.backend_name(),
        config.server.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
            log::info!("Shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Fails frame waits still parked on the blocking pool, so the runtime
    // can drain without reopening the camera
    tokio::task::spawn_blocking(move || session.shutdown(SHUTDOWN_TIMEOUT)).await??;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn video(State(state): State<AppState>) -> Response {
    let mut shutdown = state.shutdown.clone();
    let stream = state.camera.mjpeg_stream().take_until(async move {
        let _ = shutdown.wait_for(|stopping| *stopping).await;
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mjpeg_content_type())
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            log::error!("Failed to build MJPEG response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

async fn image(State(state): State<AppState>) -> Response {
    match state.camera.still_image().await {
        Ok(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Err(e) => {
            log::warn!("Still capture failed: {}", e);
            (error_status(&e), e.to_string()).into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.camera.session().status())
}

fn error_status(error: &CameraError) -> StatusCode {
    match error {
        CameraError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CameraError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
