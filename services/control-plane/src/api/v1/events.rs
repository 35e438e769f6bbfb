//! Live-update stream endpoint.
//!
//! Each connection registers one bounded subscription for the calling user
//! and forwards its events as server-sent `message` frames until the
//! client disconnects or the subscription is evicted.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    routing::get,
    Router,
};
use futures_core::Stream;
use tokio::sync::mpsc;
use tracing::warn;

use vdesk_events::StateChangeEvent;

use crate::api::request_context::RequestContext;
use crate::notify::{SubscriptionId, SubscriptionRegistry};
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Create event stream routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/stream", get(stream_events))
}

/// Stream instance state changes for the calling user.
///
/// GET /v1/events/stream
async fn stream_events(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Sse<KeepAliveStream<EventBridge>> {
    let (id, rx) = state.registry().register(&ctx.username);
    let bridge = EventBridge {
        registry: state.registry().clone(),
        username: ctx.username,
        id,
        rx,
    };
    Sse::new(bridge).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// Bridges one registered subscription to an SSE response body.
///
/// The stream ends when the subscription's channel closes (the registry
/// evicted it, or the process is shutting down), so the client observes
/// EOF and reconnects. Dropping the bridge unregisters the subscription,
/// releasing its slot on client disconnect.
struct EventBridge {
    registry: Arc<SubscriptionRegistry>,
    username: String,
    id: SubscriptionId,
    rx: mpsc::Receiver<StateChangeEvent>,
}

impl Stream for EventBridge {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match self.rx.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    match Event::default().event("message").json_data(&event) {
                        Ok(frame) => Poll::Ready(Some(Ok(frame))),
                        Err(e) => {
                            warn!(error = %e, "Dropping unserializable event frame");
                            continue;
                        }
                    }
                }
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.registry.unregister(&self.username, self.id);
    }
}
