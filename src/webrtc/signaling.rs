//! WebRTC signaling types and the offer/answer endpoint

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::session::SessionManager;
use super::transport::{SdpType, SessionDescription};
use crate::error::{AppError, Result};

/// Answer returned to the browser, `{sdp, type: "answer"}`
pub type SdpAnswer = SessionDescription;

/// Raw offer body as posted by the client
#[derive(Debug, Clone, Deserialize)]
pub struct OfferRequest {
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default, rename = "type")]
    pub sdp_type: Option<String>,
}

impl OfferRequest {
    /// Parse and validate an offer body
    pub fn parse(body: &[u8]) -> Result<SessionDescription> {
        let request: OfferRequest = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedOffer(format!("invalid JSON: {}", e)))?;

        let sdp = request
            .sdp
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::MalformedOffer("missing sdp".to_string()))?;

        match request.sdp_type.as_deref() {
            Some(t) if t == SdpType::Offer.to_string() => Ok(SessionDescription::offer(sdp)),
            Some(t) => Err(AppError::MalformedOffer(format!(
                "expected type 'offer', got '{}'",
                t
            ))),
            None => Err(AppError::MalformedOffer("missing type".to_string())),
        }
    }
}

/// Optional per-request video overrides (`?w=&h=&fps=`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

impl StreamParams {
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            width: positive_param(query, "w")?,
            height: positive_param(query, "h")?,
            fps: positive_param(query, "fps")?,
        })
    }
}

fn positive_param(query: &HashMap<String, String>, key: &str) -> Result<Option<u32>> {
    let Some(raw) = query.get(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u32>() {
        Ok(v) if v > 0 => Ok(Some(v)),
        _ => Err(AppError::BadRequest(format!(
            "query parameter '{}' must be a positive integer, got '{}'",
            key, raw
        ))),
    }
}

/// Connection state notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the peer will not carry media again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// HTTP-facing signaling contract, delegating to [`SessionManager`]
#[derive(Clone)]
pub struct SignalingEndpoint {
    sessions: Arc<SessionManager>,
}

impl SignalingEndpoint {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Validate the offer and query, then negotiate a new session
    pub async fn handle_offer(
        &self,
        body: &[u8],
        query: &HashMap<String, String>,
    ) -> Result<SdpAnswer> {
        let offer = OfferRequest::parse(body)?;
        let params = StreamParams::from_query(query)?;
        debug!("Offer received ({} bytes), params {:?}", offer.sdp.len(), params);

        self.sessions.handle_offer(offer, params).await
    }

    /// Close every session
    pub async fn handle_shutdown(&self) {
        info!("Signaling shutdown requested");
        self.sessions.shutdown().await;
    }
}
