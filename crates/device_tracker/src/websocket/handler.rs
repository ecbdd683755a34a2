use crate::domain::{SnapshotBroadcaster, VIEWER_IDLE_TIMEOUT, VIEWER_WRITE_TIMEOUT};
use crate::websocket::{ConnectionRegistry, ViewerSink, WebSocketViewer};
use anyhow::Context;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Registry label for browser viewers
pub const VIEWER_LABEL: &str = "browsers";

#[derive(Clone)]
pub struct ViewerState {
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<SnapshotBroadcaster>,
    pub idle_timeout: Duration,
    /// Closes open viewer sessions on shutdown
    pub shutdown: CancellationToken,
}

impl ViewerState {
    pub fn new(broadcaster: Arc<SnapshotBroadcaster>, shutdown: CancellationToken) -> Self {
        Self {
            registry: Arc::clone(broadcaster.registry()),
            broadcaster,
            idle_timeout: VIEWER_IDLE_TIMEOUT,
            shutdown,
        }
    }
}

pub fn router(state: ViewerState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    State(state): State<ViewerState>,
) -> Response {
    let client = client_identity(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    ws.on_upgrade(move |socket| handle_socket(socket, client, state))
}

/// First `X-Forwarded-For` hop, else the peer address
fn client_identity(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match (forwarded, remote_addr) {
        (Some(hop), _) => hop.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

async fn handle_socket(socket: WebSocket, client: String, state: ViewerState) {
    let (sender, receiver) = socket.split();
    let sink: Arc<dyn ViewerSink> = Arc::new(WebSocketViewer::new(sender));

    let span = info_span!("viewer_session", client = %client);
    serve_viewer(sink, receiver, client, &state).instrument(span).await;
}

/// Drive one viewer session from join to leave.
///
/// The viewer is registered, sent the current snapshot, then kept until it
/// closes, errors, goes quiet for `idle_timeout`, or shutdown is requested.
/// It always leaves the registry on the way out.
pub async fn serve_viewer<S, E>(sink: Arc<dyn ViewerSink>, mut inbound: S, client: String, state: &ViewerState)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let id = state
        .registry
        .join(VIEWER_LABEL, client, Arc::clone(&sink))
        .await;

    if send_catch_up(sink.as_ref(), &state.broadcaster).await {
        loop {
            let next = tokio::select! {
                _ = state.shutdown.cancelled() => {
                    debug!(viewer_id = id, "shutdown requested, closing viewer");
                    break;
                }
                next = tokio::time::timeout(state.idle_timeout, inbound.next()) => next,
            };

            match next {
                Err(_) => {
                    info!(viewer_id = id, idle_secs = state.idle_timeout.as_secs(), "viewer idle, closing");
                    break;
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Err(e))) => {
                    debug!(viewer_id = id, error = %e, "websocket receive error");
                    break;
                }
                // Inbound frames carry nothing; they only prove the viewer is alive.
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    state.registry.leave(id).await;
}

async fn send_catch_up(sink: &dyn ViewerSink, broadcaster: &SnapshotBroadcaster) -> bool {
    let snapshot = match broadcaster.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            // Still connected; the next broadcast brings the viewer up to date.
            warn!(error = %e, "failed to assemble catch-up snapshot");
            return true;
        }
    };

    match tokio::time::timeout(VIEWER_WRITE_TIMEOUT, sink.send(snapshot)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "failed to send catch-up snapshot");
            false
        }
        Err(_) => {
            warn!("catch-up snapshot write timed out");
            false
        }
    }
}

/// Serve `router` on `addr` until `token` is cancelled
pub async fn run_http_server(addr: SocketAddr, router: Router, token: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;

    info!(addr = %addr, "HTTP server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { token.cancelled().await })
    .await
    .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use bytes::Bytes;
    use chrono::Utc;
    use common::domain::{DeviceRecord, DeviceRepository, InMemoryDeviceRepository};
    use futures::channel::mpsc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl ViewerSink for RecordingSink {
        async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
            self.frames.lock().unwrap().push(payload);
            Ok(())
        }
    }

    async fn state_with_device() -> ViewerState {
        let repo = Arc::new(InMemoryDeviceRepository::new());
        repo.upsert_device(DeviceRecord::empty("d1", Utc::now())).await.unwrap();
        let broadcaster = Arc::new(SnapshotBroadcaster::new(repo, Arc::new(ConnectionRegistry::new())));
        ViewerState::new(broadcaster, CancellationToken::new())
    }

    #[test]
    fn test_client_identity_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let peer: SocketAddr = "10.0.0.1:51000".parse().unwrap();

        assert_eq!(client_identity(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(client_identity(&HeaderMap::new(), Some(peer)), "10.0.0.1");
        assert_eq!(client_identity(&HeaderMap::new(), None), "unknown");
    }

    #[tokio::test]
    async fn test_viewer_receives_catch_up_and_leaves_on_close() {
        let state = state_with_device().await;
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();

        let session = {
            let state = state.clone();
            let sink: Arc<dyn ViewerSink> = sink.clone();
            tokio::spawn(async move { serve_viewer(sink, rx, "10.0.0.1".to_string(), &state).await })
        };

        tx.unbounded_send(Ok(Message::Ping(Vec::new()))).unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        session.await.unwrap();

        let frames = sink.frames.lock().unwrap().clone();
        assert_eq!(frames, vec![state.broadcaster.snapshot().await.unwrap()]);
        assert_eq!(state.registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_viewer_is_dropped() {
        let state = state_with_device().await;
        let (_tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();

        let session = {
            let state = state.clone();
            tokio::spawn(async move {
                serve_viewer(Arc::new(RecordingSink::default()), rx, "idle".to_string(), &state).await
            })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(state.registry.count().await, 1);

        tokio::time::sleep(VIEWER_IDLE_TIMEOUT).await;
        session.await.unwrap();
        assert_eq!(state.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_viewer() {
        let state = state_with_device().await;
        let (_tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();

        let session = {
            let state = state.clone();
            tokio::spawn(async move {
                serve_viewer(Arc::new(RecordingSink::default()), rx, "a".to_string(), &state).await
            })
        };

        state.shutdown.cancel();
        session.await.unwrap();
        assert_eq!(state.registry.count().await, 0);
    }
}
