use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use loader_core::{Dispatcher, Event};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct EventPostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dispatch one object arrival event and answer once every matching handler is done.
pub async fn post(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(event): Json<Event>,
) -> Result<Json<EventPostResponse>, (StatusCode, Json<EventPostResponse>)> {
    debug!("received event: {:?}", event);

    if let Err(e) = dispatcher.handle(&event).await {
        for failure in e.failures() {
            error!(
                handler = %failure.handler,
                kind = failure.source.kind(),
                row = ?failure.source.row(),
                "{}",
                failure
            );
        }

        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(EventPostResponse {
                error: Some(e.to_string()),
            }),
        ));
    }

    Ok(Json(EventPostResponse::default()))
}
