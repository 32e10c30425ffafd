//! HTTP Server for the listload dashboard.
//!
//! Lets a browser preview a contact file, start one upload job at a time
//! and follow it live.
//!
//! # API Endpoints
//!
//! | Method | Path              | Description                          |
//! |--------|-------------------|--------------------------------------|
//! | GET    | `/health`         | Health check                         |
//! | POST   | `/api/preview`    | Preview a file without uploading     |
//! | POST   | `/api/upload`     | Start an upload job                  |
//! | GET    | `/api/status`     | Latest job snapshot                  |
//! | GET    | `/api/progress`   | SSE stream of job snapshots          |
//! | POST   | `/api/cancel`     | Cancel the running job               |
//! | GET    | `/api/logs`       | SSE stream for real-time logs        |

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, Method},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::logs::{log_error, log_info, log_warning, LOG_BROADCASTER};
use super::types::{CancelResponse, PreviewResponse, UploadStarted};
use crate::client::{HttpIngestClient, UploadParams};
use crate::config::UploaderConfig;
use crate::error::{ConfigResult, JobResult, ServerError, ServerResult};
use crate::job::{JobSnapshot, UploadJob};
use crate::plan::plan_chunks;
use crate::preview::build_preview;
use crate::reader::{read_lines, FilePurpose, RawFile};
use crate::upload::Orchestrator;

/// Largest accepted request body. Contact lists run to tens of megabytes.
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// The job currently owned by the server.
struct RunningJob {
    id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningJob {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct Inner {
    config: UploaderConfig,
    orchestrator: Arc<Orchestrator<HttpIngestClient>>,
    running: Mutex<Option<RunningJob>>,
    progress: watch::Sender<Option<JobSnapshot>>,
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    pub fn new(config: UploaderConfig) -> ConfigResult<Self> {
        let client = HttpIngestClient::new(&config)?;
        let orchestrator = Orchestrator::new(client, &config);
        let (progress, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                orchestrator: Arc::new(orchestrator),
                running: Mutex::new(None),
                progress,
            }),
        })
    }

    /// Latest snapshot of the current or last job.
    pub fn latest(&self) -> Option<JobSnapshot> {
        self.inner.progress.borrow().clone()
    }
}

/// Build the dashboard router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/preview", post(preview))
        .route("/api/upload", post(upload))
        .route("/api/status", get(status))
        .route("/api/progress", get(sse_progress))
        .route("/api/cancel", post(cancel))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(
    port: u16,
    config: UploaderConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let upload_url = config.upload_url();
    let app = router(AppState::new(config)?);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 Listload server running on http://localhost:{}", port);
    println!("   POST /api/preview  - Preview a contact file");
    println!("   POST /api/upload   - Start an upload job");
    println!("   GET  /api/progress - SSE job progress");
    println!("   POST /api/cancel   - Cancel the running job");
    println!("   GET  /api/logs     - SSE log stream");
    println!("   GET  /health       - Health check");
    println!();
    println!("📡 Chunks are sent to {}", upload_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "listload",
        "version": env!("CARGO_PKG_VERSION"),
        "ingestUrl": state.inner.config.upload_url(),
        "endpoints": {
            "preview": "POST /api/preview",
            "upload": "POST /api/upload",
            "progress": "GET /api/progress (SSE)",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// Fields of the upload form.
#[derive(Default)]
struct UploadForm {
    file: Option<RawFile>,
    include_name: bool,
    country: Option<String>,
    campaign_id: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> ServerResult<Self> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" | "arquivo" => {
                    let file_name = field.file_name().unwrap_or("contatos.txt").to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                    form.file = Some(RawFile::from_bytes(file_name, bytes.to_vec()));
                }
                "incluir_nome" | "pais_preferido" | "campaign_id" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                    let value = value.trim().to_string();
                    match name.as_str() {
                        "incluir_nome" => form.include_name = parse_flag(&value),
                        "pais_preferido" if !value.is_empty() => form.country = Some(value),
                        "campaign_id" if !value.is_empty() => form.campaign_id = Some(value),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn take_file(&mut self) -> ServerResult<RawFile> {
        self.file
            .take()
            .ok_or_else(|| ServerError::BadRequest("No file provided".to_string()))
    }

    fn params(&self, file_name: &str) -> UploadParams {
        let defaults = UploadParams::default();
        UploadParams {
            campaign_id: self.campaign_id.clone(),
            country: self.country.clone().unwrap_or(defaults.country),
            include_name: self.include_name,
            file_name: file_name.to_string(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes")
}

/// Preview endpoint
async fn preview(multipart: Multipart) -> ServerResult<Json<PreviewResponse>> {
    let file = UploadForm::read(multipart).await?.take_file()?;
    log_info(format!("🔎 Preview: {} ({} bytes)", file.name(), file.size()));

    let response = tokio::task::spawn_blocking(move || -> ServerResult<PreviewResponse> {
        file.ensure_supported(FilePurpose::Preview)?;
        let lines = read_lines(&file)?;
        let preview = build_preview(&lines)?;
        Ok(PreviewResponse {
            file_name: file.name().to_string(),
            file_size: file.size(),
            preview,
            plan: plan_chunks(&lines).summary(),
        })
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;

    Ok(Json(response))
}

/// Upload endpoint: prepares the job, then runs it in the background.
async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ServerResult<Json<UploadStarted>> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file()?;
    let params = form.params(file.name());

    if state.inner.running.lock().await.as_ref().is_some_and(RunningJob::is_active) {
        return Err(ServerError::Busy);
    }

    println!("\n{}", "=".repeat(70));
    println!("📄 NEW UPLOAD: {} ({} bytes)", file.name(), file.size());
    println!("{}\n", "=".repeat(70));

    let (job, preview) = tokio::task::spawn_blocking(move || -> JobResult<_> {
        let mut job = UploadJob::new(file);
        let preview = job.prepare()?.clone();
        Ok((job, preview))
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;

    let plan = job.plan()?.summary();
    let job_id = job.id();

    let mut running = state.inner.running.lock().await;
    if running.as_ref().is_some_and(RunningJob::is_active) {
        return Err(ServerError::Busy);
    }

    let cancel = CancellationToken::new();
    forward_snapshots(&state, &job);
    let handle = spawn_job(&state, job, params, cancel.clone());
    *running = Some(RunningJob {
        id: job_id,
        cancel,
        handle,
    });

    Ok(Json(UploadStarted {
        job_id,
        status: "uploading".to_string(),
        total_lines: plan.total_lines,
        total_chunks: plan.total_chunks,
        chunk_size: plan.chunk_size,
        preview,
    }))
}

/// Mirror the job's snapshots into the server-wide progress channel.
fn forward_snapshots(state: &AppState, job: &UploadJob) {
    let mut snapshots = job.subscribe();
    let inner = Arc::clone(&state.inner);

    tokio::spawn(async move {
        let first = snapshots.borrow_and_update().clone();
        inner.progress.send_replace(Some(first));

        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            inner.progress.send_replace(Some(snapshot));
        }
    });
}

fn spawn_job(
    state: &AppState,
    mut job: UploadJob,
    params: UploadParams,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let orchestrator = Arc::clone(&state.inner.orchestrator);

    tokio::spawn(async move {
        match job.upload(&*orchestrator, &params, &cancel).await {
            Ok(summary) => println!("\n📊 {}\n", summary.status_message),
            Err(e) => log_error(format!("Upload job {} failed to start: {}", job.id(), e)),
        }
    })
}

/// Latest job snapshot, `null` before the first job
async fn status(State(state): State<AppState>) -> Json<Option<JobSnapshot>> {
    Json(state.latest())
}

/// SSE endpoint for job progress
async fn sse_progress(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.inner.progress.subscribe();

    let stream = WatchStream::new(rx).filter_map(|snapshot| {
        let json = serde_json::to_string(&snapshot?).ok()?;
        Some(Ok(Event::default().event("progress").data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Cancel endpoint
async fn cancel(State(state): State<AppState>) -> ServerResult<Json<CancelResponse>> {
    let running = state.inner.running.lock().await;
    let job = running
        .as_ref()
        .filter(|job| job.is_active())
        .ok_or_else(|| ServerError::NotFound("no upload job is running".to_string()))?;

    job.cancel.cancel();
    log_warning(format!("Cancellation requested for job {}", job.id));

    Ok(Json(CancelResponse {
        job_id: job.id,
        cancelled: true,
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_form_params_defaults() {
        let form = UploadForm::default();
        let params = form.params("lista.csv");
        assert_eq!(params.country, "auto");
        assert_eq!(params.campaign_id, None);
        assert!(!params.include_name);
        assert_eq!(params.file_name, "lista.csv");
    }

    #[test]
    fn test_form_requires_file() {
        let mut form = UploadForm::default();
        assert!(matches!(form.take_file(), Err(ServerError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_state_starts_without_snapshot() {
        let state = AppState::new(UploaderConfig::default()).unwrap();
        assert!(state.latest().is_none());
    }
}
