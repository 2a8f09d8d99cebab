use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    state::SharedState,
};

/// Adapt a broadcast receiver into a stream, skipping events lost to lag.
pub fn broadcast_events(
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> impl Stream<Item = ServerEvent> + Send + 'static {
    async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => yield event,
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE subscriber lagged; skipping stale events");
                    continue;
                }
            }
        }
    }
}

/// Handshake event sent first on every stream.
pub async fn handshake(state: &SharedState, stream: &str) -> Option<ServerEvent> {
    let payload = Handshake {
        stream: stream.to_string(),
        message: format!("{stream} stream connected"),
        degraded: state.is_degraded().await,
    };
    ServerEvent::json(Some("handshake".to_string()), &payload).ok()
}

/// Forward `events` into an SSE response, stopping once the client disconnects.
pub fn to_sse_stream<S>(
    events: S,
    label: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ServerEvent> + Send + 'static,
{
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from the source stream and pushes into mpsc
    tokio::spawn(async move {
        let mut events = Box::pin(events);
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = events.next() => {
                    let Some(payload) = next else {
                        break;
                    };

                    let mut event = Event::default().data(payload.data);
                    if let Some(name) = payload.event {
                        event = event.event(name);
                    }

                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!(stream = label, "SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
