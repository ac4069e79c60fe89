use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tracing::info;

use crate::api::AppState;

/// SSE event name for a newly committed record
pub const NEW_RECORD_EVENT: &str = "audit:new";

/// GET /audit/stream
///
/// One `audit:new` event per committed record. A viewer that falls too far
/// behind misses the oldest events and should re-query to catch up.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.service.subscribe();
    info!("Live audit viewer {} connected", subscription.id());

    let service = state.service.clone();
    let events = subscription.into_stream().then(move |record| {
        let service = service.clone();
        async move {
            let view = service.view(&record).await;
            Event::default()
                .event(NEW_RECORD_EVENT)
                .id(view.id.to_string())
                .json_data(view)
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
