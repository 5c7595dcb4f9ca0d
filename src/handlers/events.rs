use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;

use crate::errors::AppError;
use crate::state::AppState;

// GET /api/events?token=...&shop_id=...
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
    pub shop_id: Option<String>,
}

/// Live feed of committed reservation events. There is no replay: a client
/// only sees events published after it subscribed.
pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Auth via query param (EventSource can't set headers)
    if query.token.as_deref().unwrap_or("") != state.config.admin_token {
        return Err(AppError::Unauthorized);
    }

    let shop_filter = query.shop_id;
    let live_stream = BroadcastStream::new(state.events_tx.subscribe()).filter_map(move |result| match result {
        Ok(event) => {
            if shop_filter.as_ref().is_some_and(|id| id != &event.reservation.shop_id) {
                return None;
            }
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().data(data).event(event.kind.as_str())))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "event subscriber lagged");
            None
        }
    });

    let keepalive_stream = StreamExt::map(
        IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    Ok(Sse::new(StreamExt::merge(live_stream, keepalive_stream)))
}
