//! Server-Sent Events stream of the rendered view
//!
//! Every bus event triggers a fresh render from current component state, so
//! a lagged subscriber only misses intermediate frames, never the latest one.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::AppContext;

/// GET /api/events
///
/// Sends the current view immediately, then one `view` event per change.
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected");

    let rx = ctx.events.subscribe();
    let initial = stream::once(std::future::ready(ctx.view()));

    let updates = BroadcastStream::new(rx).map(move |result| {
        match &result {
            Ok(event) => debug!("Re-rendering view after {}", event.event_type()),
            Err(e) => warn!("SSE subscriber lagged: {}", e),
        }
        ctx.view()
    });

    let stream = initial.chain(updates).filter_map(|view| async move {
        match Event::default().event("view").json_data(&view) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to serialize view: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
