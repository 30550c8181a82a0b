use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use utoipa::IntoParams;

use crate::context::SessionHandle;
use crate::gate::AppState;

#[derive(Deserialize, Debug, IntoParams)]
pub struct ResumeQuery {
    /// Handle returned by `/v1/process`.
    #[serde(rename = "StateId")]
    pub state_id: String,
}

#[utoipa::path(
    get,
    path= "/v1/resume",
    params(ResumeQuery),
    responses (
        (status = 200, description = "Suspended request context"),
        (status = 404, description = "Unknown or expired StateId")
    ),
    tag= "mfagate"
)]
#[instrument(skip_all)]
pub async fn resume(
    state: Extension<Arc<AppState>>,
    Query(query): Query<ResumeQuery>,
) -> Response {
    let handle = SessionHandle::from(query.state_id);
    match state.filter().resume(&handle).await {
        Ok(ctx) => (StatusCode::OK, Json(ctx)).into_response(),
        Err(err) => {
            debug!("resume {handle} failed: {err}");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"kind": err.kind(), "detail": err.to_string()})),
            )
                .into_response()
        }
    }
}
