//! Server-sent event stream of progress deltas.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use journey_core::UserId;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Query of `GET /api/progress/realtime`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeQuery {
    /// User to follow
    pub user_id: Option<String>,
}

/// `GET /api/progress/realtime?userId=...`
///
/// Sends `connected` first, then every delta published for the user.
/// Dropping the connection drops the subscription.
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let user_id = query
        .user_id
        .filter(|u| !u.trim().is_empty())
        .map(UserId::new)
        .ok_or_else(|| ApiError::BadRequest("userId query parameter is required".to_string()))?;

    let mut subscription = state.notifier().subscribe(&user_id);
    info!(
        user_id = %user_id,
        subscription_id = %subscription.id(),
        "realtime client connected"
    );

    let events = async_stream::stream! {
        let connected = json!({ "type": "connected", "data": { "userId": user_id.as_str() } });
        yield Ok(Event::default().data(connected.to_string()));

        while let Some(delta) = subscription.recv().await {
            match Event::default().json_data(&delta) {
                Ok(event) => yield Ok(event),
                Err(e) => warn!(user_id = %user_id, error = %e, "cannot encode delta"),
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}
