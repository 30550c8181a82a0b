use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};
use utoipa::ToSchema;

use super::extract_client_ip;
use crate::context::RequestContext;
use crate::error::ErrorKind;
use crate::gate::AppState;
use crate::orchestrator::Decision;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct Destination {
    /// Audience (service provider) identifier.
    #[serde(default)]
    pub entityid: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Falls back to `x-forwarded-for` / `x-real-ip` when absent.
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub destination: Destination,
    /// Host and sibling-filter namespaces carried through the flow.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub state: BTreeMap<String, Value>,
}

impl ProcessRequest {
    fn into_context(self, headers: &HeaderMap) -> RequestContext {
        let client_ip = self
            .client_ip
            .filter(|ip| !ip.trim().is_empty())
            .or_else(|| extract_client_ip(headers))
            .unwrap_or_default();

        RequestContext {
            attributes: self.attributes,
            client_ip,
            audience_id: self.destination.entityid,
            state: self.state,
            ..RequestContext::default()
        }
    }
}

#[utoipa::path(
    post,
    path= "/v1/process",
    request_body = ProcessRequest,
    responses (
        (status = 200, description = "Continue the host flow or redirect to the challenge UI"),
        (status = 500, description = "The request cannot continue"),
        (status = 502, description = "The authentication server could not be read")
    ),
    tag= "mfagate"
)]
#[instrument(skip_all)]
pub async fn process(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<ProcessRequest>,
) -> impl IntoResponse {
    let ctx = request.into_context(&headers);
    let outcome = state.filter().process(ctx).await;

    match outcome.decision {
        Decision::Continue => {
            debug!("continue");
            (
                StatusCode::OK,
                Json(json!({"decision": "continue", "context": outcome.context})),
            )
        }
        Decision::Redirect { handle } => {
            let location = state.challenge_location(handle.as_str());
            debug!("redirect to {location}");
            (
                StatusCode::OK,
                Json(json!({
                    "decision": "redirect",
                    "stateId": handle,
                    "location": location,
                })),
            )
        }
        Decision::Fail { kind, detail } => {
            let status = if kind == ErrorKind::RemoteProtocolError {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(json!({"decision": "fail", "kind": kind, "detail": detail})),
            )
        }
    }
}
