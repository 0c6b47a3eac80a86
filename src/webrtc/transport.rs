//! Real-time transport seam
//!
//! Session management only talks to the peer through these traits; the
//! webrtc-rs implementation lives in [`super::peer`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use super::signaling::ConnectionState;
use crate::error::Result;
use crate::media::TrackProducer;

/// SDP type as it appears in the `type` field of a description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }
}

/// One peer connection
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Attach a producer; the transport pulls frames from it once connected
    async fn add_track(&self, producer: Arc<dyn TrackProducer>) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply the local answer and return it as it should be sent to the
    /// remote side (with gathered candidates where the transport adds them)
    async fn set_local_description(&self, desc: SessionDescription) -> Result<SessionDescription>;

    /// Connection state updates. A terminal sender failure is reported as `Failed`.
    fn state_watch(&self) -> watch::Receiver<ConnectionState>;

    /// Stop senders and close the connection. Idempotent.
    async fn close(&self);
}

/// Creates peer sessions
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_session(&self, session_id: &str) -> Result<Box<dyn PeerSession>>;
}
