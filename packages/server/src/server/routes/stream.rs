//! SSE progress endpoint.
//!
//! GET /api/events
//!
//! Subscribes to the orchestrator's progress hub and forwards each event as
//! an SSE event named after its `type` tag.

use std::convert::Infallible;

use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::server::app::AppState;

pub async fn events_handler(
    Extension(state): Extension<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.progress().subscribe();

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default()
                .event(event.kind())
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                Event::default()
                    .event("lagged")
                    .json_data(serde_json::json!({ "missed": n }))
                    .ok()
                    .map(Ok)
            }
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
