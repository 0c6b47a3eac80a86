use std::sync::Arc;

use crate::config::AppConfig;
use crate::webrtc::{SessionManager, SignalingEndpoint};

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration the process was started with
    pub config: AppConfig,
    /// Offer/answer endpoint, owns the session manager
    pub signaling: SignalingEndpoint,
}

impl AppState {
    pub fn new(config: AppConfig, sessions: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            config,
            signaling: SignalingEndpoint::new(sessions),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.signaling.sessions()
    }
}
