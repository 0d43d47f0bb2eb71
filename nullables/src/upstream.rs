//! Nullable upstream, a scripted stand-in for the delegation HTTP API.
//!
//! Serves on an ephemeral localhost port. Each request pops the next
//! scripted response; once the script is exhausted the fallback response
//! (an empty page by default) is served. Every request's query is recorded.
//! Bodies can be streamed in chunks, optionally cut off mid-transfer.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Path the nullable serves delegations on.
pub const DELEGATIONS_PATH: &str = "/v1/operations/delegations";

/// Pause between streamed chunks, so each one reaches the client on its own.
const CHUNK_PAUSE: Duration = Duration::from_millis(2);

/// A canned HTTP response.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
    pub status: u16,
    pub body: String,
    /// Stream the body as these chunks instead of `body`.
    pub chunks: Option<Vec<String>>,
    /// Fail the body stream after the last chunk, dropping the connection.
    pub abort: bool,
}

impl ScriptedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            chunks: None,
            abort: false,
        }
    }

    /// A 200 whose body is sent with chunked transfer encoding.
    pub fn chunked<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<String> = chunks.into_iter().map(Into::into).collect();
        Self {
            status: 200,
            body: chunks.concat(),
            chunks: Some(chunks),
            abort: false,
        }
    }

    /// Like [`ScriptedResponse::chunked`], but the connection drops after
    /// the last chunk instead of the body completing.
    pub fn aborted<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            abort: true,
            ..Self::chunked(chunks)
        }
    }

    pub fn empty_page() -> Self {
        Self::ok("[]")
    }
}

/// One request as seen by the nullable.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// Decoded query parameters.
    pub params: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Default)]
struct UpstreamState {
    script: Mutex<VecDeque<ScriptedResponse>>,
    fallback: Mutex<Option<ScriptedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

pub struct NullUpstream {
    addr: SocketAddr,
    state: Arc<UpstreamState>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl NullUpstream {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let state = Arc::new(UpstreamState::default());
        let app = Router::new()
            .route(DELEGATIONS_PATH, get(serve_delegations))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind null upstream");
        let addr = listener.local_addr().expect("null upstream address");
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
        });

        Self {
            addr,
            state,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Full URL of the delegations endpoint.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, DELEGATIONS_PATH)
    }

    /// Queue a response to be served once, after any already queued.
    pub fn push(&self, response: ScriptedResponse) {
        self.state.script.lock().unwrap().push_back(response);
    }

    /// Response served once the script is exhausted.
    pub fn set_fallback(&self, response: ScriptedResponse) {
        *self.state.fallback.lock().unwrap() = Some(response);
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// Stop serving and wait for the server task to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for NullUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_delegations(
    State(state): State<Arc<UpstreamState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push(RecordedRequest { params });

    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let next = state.script.lock().unwrap().pop_front();
    let response = next
        .or_else(|| state.fallback.lock().unwrap().clone())
        .unwrap_or_else(ScriptedResponse::empty_page);

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match response.chunks {
        Some(chunks) => chunked_body(chunks, response.abort),
        None => Body::from(response.body),
    };
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn chunked_body(chunks: Vec<String>, abort: bool) -> Body {
    let tail = abort.then(|| {
        Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "scripted abort",
        ))
    });
    let items = chunks.into_iter().map(Ok::<_, io::Error>).chain(tail);
    Body::from_stream(stream::iter(items).then(|item| async move {
        tokio::time::sleep(CHUNK_PAUSE).await;
        item
    }))
}
