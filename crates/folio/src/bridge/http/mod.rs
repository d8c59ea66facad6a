//! HTTP bridge for the live preview.
//!
//! Serves a small page that hosts the preview in an iframe, exposes the
//! virtual scheme under `/preview/` (answered by the [`ContentProvider`]),
//! and keeps the page in step with the orchestrator over a WebSocket.
//! Editors push unsaved buffers and cursor positions through the JSON API.

mod session;
mod view;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State, WebSocketUpgrade, ws},
    http::{Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{any, get, post, put},
};
use eyre::{Result, WrapErr};
use folio_core::{BufferOverlay, Container, DirContainer, Workspace, media, name_to_url};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::preview::{Preview, PreviewEvent, SourcelineAddress, Toggles};
use crate::provider::{ContentProvider, RequestError, ResourceRequest};
use crate::watcher::{self, DiskActivity, DiskActivityReport};
use crate::worker::{ParseWorker, ParserProcess};

pub use session::{
    EventSink, Session, SessionCommand, SessionHandle, SessionStatus, ToggleChange,
};
pub use view::{
    BrowserView, ClientMessage, PREVIEW_PREFIX, ViewCommand, ViewSnapshot, url_to_path,
};

/// Options for [`run`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub root: PathBuf,
    pub config: Config,
    pub port: Option<u16>,
    pub open: bool,
    /// Document to show on startup.
    pub document: Option<String>,
}

/// State shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub provider: ContentProvider,
    pub workspace: Arc<Workspace>,
    pub buffers: Arc<BufferOverlay>,
    pub worker: Arc<ParseWorker>,
    pub disk: Arc<DiskActivity>,
    pub pages: Arc<PageLinks>,
    /// Broadcast channel for driving connected pages
    pub view_tx: broadcast::Sender<ViewCommand>,
    pub snapshot: Arc<Mutex<ViewSnapshot>>,
    /// Where the container was opened from, for reopening
    pub root: PathBuf,
}

/// Build the router over prepared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(shell))
        .route("/placeholder", get(placeholder))
        .route("/ws", get(ws_handler))
        .route("/preview/{*path}", any(preview_resource))
        .route("/api/names", get(api_names))
        .route("/api/status", get(api_status))
        .route("/api/show", post(api_show))
        .route("/api/refresh", post(api_refresh))
        .route("/api/clear", post(api_clear))
        .route("/api/reopen", post(api_reopen))
        .route("/api/cursor", post(api_cursor))
        .route("/api/toggles", post(api_toggles))
        .route(
            "/api/buffers/{*name}",
            put(api_buffer_put).delete(api_buffer_delete),
        )
        .with_state(state)
}

/// Run the preview server for the book at `options.root`.
pub async fn run(options: ServeOptions) -> Result<()> {
    let ServeOptions {
        root,
        config,
        port,
        open,
        document,
    } = options;

    let container = DirContainer::open(&root)?;
    info!("Previewing book at {}", container.root().display());
    let root = container.root().to_path_buf();

    let buffers = Arc::new(BufferOverlay::new());
    let workspace = Arc::new(Workspace::new(Arc::new(container), buffers.clone()));

    let worker = Arc::new(ParseWorker::new(
        Arc::clone(&workspace),
        config.worker.coalesce_window(),
    ));
    worker.start(ParserProcess::current_exe_launcher()?)?;

    let provider = ContentProvider::new(
        Arc::clone(&worker),
        Arc::clone(&workspace),
        config.provider.poll_interval(),
    );

    // Capacity only matters for slow pages; commands are tiny
    let (view_tx, _) = broadcast::channel(64);
    let snapshot = Arc::new(Mutex::new(ViewSnapshot::default()));
    let view = BrowserView::new(view_tx.clone(), Arc::clone(&snapshot));

    let toggles = Arc::new(Toggles::new());
    toggles.set_auto_reload(config.preview.auto_reload);
    toggles.set_sync_to_editor(config.preview.sync_to_editor);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut preview = Preview::new(
        view,
        Arc::clone(&worker),
        Arc::clone(&workspace),
        toggles,
        &config.preview,
        events_tx,
    );
    preview.apply_settings(&config.preview.fonts);
    if let Some(name) = &document {
        if workspace.container().has_name(name) {
            preview.show(name);
        } else {
            warn!("{} is not in the book, starting with an empty preview", name);
        }
    }

    let disk = DiskActivity::new();
    let (watch_tx, watch_rx) = mpsc::unbounded_channel();
    // Keep the guard alive for as long as the server runs
    let _watch_guard = match watcher::watch(&root, Arc::clone(&disk), watch_tx) {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!("File watching disabled: {:?}", e);
            None
        }
    };

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let sink_tx = view_tx.clone();
    let sink: EventSink = Box::new(move |event: &PreviewEvent| {
        let _ = sink_tx.send(ViewCommand::Event {
            event: event.clone(),
        });
    });
    let session = Session::new(preview, command_rx, events_rx, sink).with_watcher(watch_rx);
    tokio::spawn(async move {
        session.run().await;
    });

    let state = AppState {
        session: SessionHandle::new(command_tx),
        provider,
        workspace,
        buffers,
        worker: Arc::clone(&worker),
        disk,
        pages: PageLinks::new(),
        view_tx,
        snapshot,
        root,
    };

    let listener = bind(port.or(config.server.port)).await?;
    let addr = listener.local_addr()?;
    info!("Preview listening on http://{}", addr);

    if open {
        let url = format!("http://{}", addr);
        if let Err(e) = ::open::that(&url) {
            eprintln!("Failed to open browser: {}. Open manually at: {}", e, url);
        }
    }

    let served = axum::serve(listener, router(state)).await;
    worker.shutdown();
    served.wrap_err("HTTP server failed")
}

/// Bind the requested port, or find a free one if none was requested.
async fn bind(port: Option<u16>) -> Result<tokio::net::TcpListener> {
    if let Some(p) = port {
        let addr = format!("127.0.0.1:{p}");
        return tokio::net::TcpListener::bind(&addr)
            .await
            .wrap_err_with(|| format!("Failed to bind {addr}"));
    }

    const DEFAULT_PORT: u16 = 3000;
    const MAX_ATTEMPTS: u16 = 20;
    for p in DEFAULT_PORT..DEFAULT_PORT + MAX_ATTEMPTS {
        if let Ok(listener) = tokio::net::TcpListener::bind(format!("127.0.0.1:{p}")).await {
            return Ok(listener);
        }
    }
    eyre::bail!(
        "Could not find a free port in range {DEFAULT_PORT}..{}",
        DEFAULT_PORT + MAX_ATTEMPTS
    )
}

// ============================================================================
// Pages
// ============================================================================

static SHELL_HTML: &str = include_str!("shell.html");

static PLACEHOLDER_HTML: &str = concat!(
    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>folio</title></head>",
    "<body style=\"font-family: sans-serif; color: #888; text-align: center; margin-top: 30vh\">",
    "<p>Nothing to preview. Pick a document above.</p></body></html>"
);

async fn shell() -> Html<&'static str> {
    Html(SHELL_HTML)
}

async fn placeholder() -> Html<&'static str> {
    Html(PLACEHOLDER_HTML)
}

/// API error response (always JSON).
#[derive(Debug, Clone, Serialize)]
struct ApiError {
    error: String,
    code: &'static str,
}

impl ApiError {
    fn response(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Response {
        (
            status,
            Json(ApiError {
                error: msg.into(),
                code,
            }),
        )
            .into_response()
    }

    fn not_found(msg: impl Into<String>) -> Response {
        Self::response(StatusCode::NOT_FOUND, "not_found", msg)
    }

    fn unavailable() -> Response {
        Self::response(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "Preview session has stopped",
        )
    }
}

// ============================================================================
// Virtual scheme
// ============================================================================

async fn preview_resource(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
) -> Response {
    let request = ResourceRequest {
        method,
        url: name_to_url(&path),
    };
    match state.provider.fetch(request).await {
        Ok(reply) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, reply.media_type),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
            Body::from(reply.body),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                RequestError::Denied => StatusCode::FORBIDDEN,
                RequestError::NotFound => StatusCode::NOT_FOUND,
                RequestError::Failed => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// Live channels to preview pages.
///
/// A page whose socket fails has usually crashed or been killed; the
/// failure is kept so that `/api/status` can tell the user.
#[derive(Debug, Default)]
pub struct PageLinks {
    connected: AtomicUsize,
    failures: AtomicU64,
    last_failure: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLinksReport {
    pub connected: usize,
    pub failures: u64,
    pub last_failure: Option<String>,
}

impl PageLinks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    /// A page went away, cleanly when `failure` is `None`.
    pub fn closed(&self, failure: Option<String>) {
        self.connected.fetch_sub(1, Ordering::SeqCst);
        if let Some(failure) = failure {
            self.failures.fetch_add(1, Ordering::SeqCst);
            *self
                .last_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(failure);
        }
    }

    pub fn report(&self) -> PageLinksReport {
        PageLinksReport {
            connected: self.connected.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            last_failure: self
                .last_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws_client(socket, state))
}

/// Drive one connected page: forward view commands, collect its reports.
async fn handle_ws_client(socket: ws::WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();
    state.pages.opened();

    // Subscribe before replaying so nothing falls in between
    let mut commands = state.view_tx.subscribe();
    let replay = state
        .snapshot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replay();

    let send_task = tokio::spawn(async move {
        for command in replay {
            if send_command(&mut tx, &command).await.is_err() {
                return;
            }
        }
        loop {
            match commands.recv().await {
                Ok(command) => {
                    if send_command(&mut tx, &command).await.is_err() {
                        break; // Client disconnected
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Page fell behind, skipping view commands");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut failure = None;
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => {
                    if !state.session.send(SessionCommand::Client(message)) {
                        break;
                    }
                }
                Err(e) => debug!("Ignoring malformed page message: {}", e),
            },
            Ok(ws::Message::Close(_)) => break,
            Err(e) => {
                warn!("Lost connection to preview page: {}", e);
                failure = Some(e.to_string());
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    if failure.is_none() {
        debug!("Preview page disconnected");
    }
    state.pages.closed(failure);
}

async fn send_command<S>(tx: &mut S, command: &ViewCommand) -> Result<()>
where
    S: futures_util::Sink<ws::Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(command)?;
    tx.send(ws::Message::Text(json.into())).await?;
    Ok(())
}

// ============================================================================
// JSON API
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct NameInfo {
    name: String,
    media_type: Option<String>,
    document: bool,
}

async fn api_names(State(state): State<AppState>) -> Json<Vec<NameInfo>> {
    let container = state.workspace.container();
    let names = container
        .names()
        .into_iter()
        .map(|name| {
            let media_type = container.mime_type(&name);
            let document = media_type.as_deref().is_some_and(media::is_document);
            NameInfo {
                name,
                media_type,
                document,
            }
        })
        .collect();
    Json(names)
}

#[derive(Debug, Clone, Serialize)]
struct StatusResponse {
    session: SessionStatus,
    document: Option<DocumentStatus>,
    worker_alive: bool,
    queued_parses: usize,
    pending_requests: Vec<String>,
    open_buffers: Vec<String>,
    pages: PageLinksReport,
    disk: DiskActivityReport,
}

/// Parse state of the document on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct DocumentStatus {
    name: String,
    /// Length of the content last sent to the parser.
    submitted_bytes: Option<usize>,
    parsed: bool,
    parse_failed: bool,
    /// Whether the last submission is still the current content.
    up_to_date: bool,
}

fn document_status(state: &AppState, name: &str) -> DocumentStatus {
    let entry = state.worker.entry(name);
    let fingerprint = entry.as_ref().and_then(|e| e.fingerprint());
    let up_to_date = fingerprint.is_some_and(|fp| {
        state
            .workspace
            .raw_data(name)
            .is_ok_and(|raw| fp.matches(raw.as_bytes()))
    });
    DocumentStatus {
        name: name.to_string(),
        submitted_bytes: entry.as_ref().and_then(|e| e.last_length()),
        parsed: entry.as_ref().is_some_and(|e| e.is_done()),
        parse_failed: entry.as_ref().is_some_and(|e| e.failed()),
        up_to_date,
    }
}

async fn api_status(State(state): State<AppState>) -> Response {
    let Some(session) = state.session.status().await else {
        return ApiError::unavailable();
    };
    let document = session
        .current
        .as_deref()
        .map(|name| document_status(&state, name));
    Json(StatusResponse {
        session,
        document,
        worker_alive: state.worker.is_alive(),
        queued_parses: state.worker.queued(),
        pending_requests: state.provider.pending_names(),
        open_buffers: state.buffers.open_names(),
        pages: state.pages.report(),
        disk: state.disk.report(),
    })
    .into_response()
}

#[derive(Debug, Clone, Deserialize)]
struct ShowRequest {
    name: String,
}

async fn api_show(State(state): State<AppState>, Json(req): Json<ShowRequest>) -> Response {
    if !state.workspace.container().has_name(&req.name) {
        return ApiError::not_found(format!("No such document: {}", req.name));
    }
    command(&state, SessionCommand::Show(req.name))
}

async fn api_refresh(State(state): State<AppState>) -> Response {
    command(&state, SessionCommand::Refresh)
}

async fn api_clear(State(state): State<AppState>) -> Response {
    command(&state, SessionCommand::Clear)
}

/// Reopen the book from disk, e.g. after files were added or removed.
async fn api_reopen(State(state): State<AppState>) -> Response {
    let container = match DirContainer::open(&state.root) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to reopen book: {:?}", e);
            return ApiError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "reopen_failed",
                format!("{e}"),
            );
        }
    };
    let container: Arc<dyn Container> = Arc::new(container);
    if state.workspace.set_container(container) {
        state.provider.clear();
        return command(&state, SessionCommand::ContainerChanged);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Clone, Deserialize)]
struct CursorRequest {
    name: String,
    lnum: Option<u32>,
    #[serde(default)]
    tags: Vec<String>,
}

async fn api_cursor(State(state): State<AppState>, Json(req): Json<CursorRequest>) -> Response {
    command(
        &state,
        SessionCommand::Cursor(SourcelineAddress {
            name: req.name,
            lnum: req.lnum,
            tags: req.tags,
        }),
    )
}

async fn api_toggles(State(state): State<AppState>, Json(change): Json<ToggleChange>) -> Response {
    command(&state, SessionCommand::Toggles(change))
}

async fn api_buffer_put(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let text = match String::from_utf8(body.to_vec()) {
        Ok(text) => text,
        Err(_) => {
            return ApiError::response(
                StatusCode::BAD_REQUEST,
                "bad_request",
                "Buffer content must be UTF-8",
            );
        }
    };
    state.buffers.open(name.clone(), text);
    command(&state, SessionCommand::BufferChanged(name))
}

async fn api_buffer_delete(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if !state.buffers.close(&name) {
        return ApiError::not_found(format!("No open buffer for {}", name));
    }
    command(&state, SessionCommand::BufferChanged(name))
}

fn command(state: &AppState, command: SessionCommand) -> Response {
    if state.session.send(command) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        ApiError::unavailable()
    }
}
