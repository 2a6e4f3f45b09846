//! HTTP front end: multipart uploads, the listing, and read-only access to
//! stored files.

use crate::admission::Permit;
use crate::error::{Error, ErrorKind, Result};
use crate::IngestHandle;
use axum::Router;
use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use exn::{OptionExt, ResultExt};
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt, future, stream};
use reel_storage::{Extensions, StoredMedia};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::io::StreamReader;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const BUSY: &str = "Server busy. Please try again later.";
const FILE_FIELD: &str = "file";
/// Chunks buffered between the request body and the session reading it.
const PIPE_DEPTH: usize = 4;

#[derive(Clone)]
struct AppState {
    ingest: IngestHandle,
    extensions: Arc<Extensions>,
}

/// Create the application router.
pub fn router(ingest: IngestHandle, extensions: Extensions) -> Router {
    let uploads = ServeDir::new(ingest.session().dir().root());
    Router::new()
        .route("/api/videos/upload", post(upload).layer(DefaultBodyLimit::disable()))
        .route("/videos", get(list))
        .nest_service("/uploads", uploads)
        .layer(middleware::from_fn(hide_dotfiles))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { ingest, extensions: Arc::new(extensions) })
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP listener ready");
    }
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await.or_raise(|| ErrorKind::Serve)
}

/// Staging and scratch files share the directory with stored media; none of
/// them are served.
async fn hide_dotfiles(request: Request, next: Next) -> Response {
    let hidden = request
        .uri()
        .path()
        .split('/')
        .any(|segment| segment.starts_with('.') || segment.get(..3).is_some_and(|s| s.eq_ignore_ascii_case("%2e")));
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// Handler error. The status code follows the error kind.
struct ApiError(Error);
impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}
impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &*self.0 {
            ErrorKind::Rejected => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Framing(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &*self.0 {
            ErrorKind::Rejected => BUSY.to_string(),
            kind => kind.to_string(),
        };
        (self.status_code(), message).into_response()
    }
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> std::result::Result<String, ApiError> {
    let permit = state.ingest.try_admit()?;
    while let Some(field) =
        multipart.next_field().await.or_raise(|| ErrorKind::Framing("malformed multipart body".to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let stored = receive(&state, permit, field).await?;
        return Ok(format!("Video uploaded successfully: {}", stored.name));
    }
    Err(ApiError(ErrorKind::Framing(format!("no {FILE_FIELD:?} field in upload")).into()))
}

/// Run a session on the worker pool, feeding it the field's bytes as they
/// arrive.
async fn receive(state: &AppState, permit: Permit, mut field: Field<'_>) -> Result<StoredMedia> {
    let name = field
        .file_name()
        .filter(|name| !name.is_empty())
        .ok_or_raise(|| ErrorKind::Framing("upload has no file name".to_string()))?
        .to_string();
    let (mut chunks, body) = mpsc::channel::<io::Result<Bytes>>(PIPE_DEPTH);
    let (finished, complete) = oneshot::channel::<()>();
    let (done, outcome) = oneshot::channel();
    let session = state.ingest.session().clone();
    state
        .ingest
        .dispatch(permit, async move {
            let body = Box::pin(StreamReader::new(body.chain(until_complete(complete))));
            let _ = done.send(session.run(&name, body).await);
        })
        .await?;

    loop {
        let next = match field.chunk().await {
            Ok(Some(chunk)) => Ok(chunk),
            Ok(None) => {
                let _ = finished.send(());
                break;
            },
            Err(e) => Err(io::Error::other(e)),
        };
        let failed = next.is_err();
        // A send error means the session already finished without the rest.
        if chunks.send(next).await.is_err() || failed {
            break;
        }
    }
    drop(chunks);

    match outcome.await {
        Ok(result) => result,
        Err(_) => exn::bail!(ErrorKind::Panicked),
    }
}

/// Ends a request body cleanly only once the whole field has arrived. If the
/// handler is dropped first (client gone, connection torn down) the session
/// reads an error instead of a short body.
fn until_complete(complete: oneshot::Receiver<()>) -> impl Stream<Item = io::Result<Bytes>> {
    stream::once(complete).filter_map(|received| {
        future::ready(received.is_err().then(|| Err(io::Error::from(io::ErrorKind::ConnectionAborted))))
    })
}

async fn list(State(state): State<AppState>) -> std::result::Result<Json<Vec<String>>, ApiError> {
    let files = state.ingest.session().dir().list(&state.extensions).await.or_raise(|| ErrorKind::Storage)?;
    Ok(Json(files.into_iter().map(|file| file.name).collect()))
}
