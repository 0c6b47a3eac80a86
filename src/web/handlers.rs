use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::state::AppState;
use crate::webrtc::SdpAnswer;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub version: &'static str,
    pub sessions: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions().session_count().await,
    })
}

/// Handle WebRTC offer
///
/// The body is taken raw so a malformed offer is reported as such rather
/// than as an extractor rejection.
pub async fn offer(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<SdpAnswer>> {
    let answer = state.signaling.handle_offer(&body, &query).await?;
    Ok(Json(answer))
}
