//! webrtc-rs implementation of the transport traits

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use super::config::WebRtcConfig;
use super::signaling::ConnectionState;
use super::track::MediaSender;
use super::transport::{PeerSession, SessionDescription, Transport};
use crate::error::{AppError, Result};
use crate::media::TrackProducer;

/// Upper bound on waiting for ICE gathering before answering
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport backed by webrtc-rs peer connections
pub struct WebRtcTransport {
    config: WebRtcConfig,
}

impl WebRtcTransport {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_session(&self, session_id: &str) -> Result<Box<dyn PeerSession>> {
        let peer = PeerConnection::new(&self.config, session_id.to_string()).await?;
        Ok(Box::new(peer))
    }
}

/// Peer connection wrapper with sender management
pub struct PeerConnection {
    session_id: String,
    config: WebRtcConfig,
    pc: Arc<RTCPeerConnection>,
    senders: Arc<parking_lot::Mutex<Vec<MediaSender>>>,
    tasks: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl PeerConnection {
    pub async fn new(config: &WebRtcConfig, session_id: String) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);

        let peer = Self {
            session_id,
            config: config.clone(),
            pc: Arc::new(pc),
            senders: Arc::new(parking_lot::Mutex::new(vec![])),
            tasks: Arc::new(parking_lot::Mutex::new(vec![])),
            state: Arc::new(state_tx),
            state_rx,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        };

        peer.setup_event_handlers();
        peer.spawn_sender_starter();

        Ok(peer)
    }

    fn setup_event_handlers(&self) {
        let state = self.state.clone();
        let session_id = self.session_id.clone();

        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer {} connection state: {}", session_id, new_state);
                    let _ = state.send(new_state);
                })
            }));
    }

    /// Start every attached sender the first time the peer reports Connected
    fn spawn_sender_starter(&self) {
        let mut state_rx = self.state_rx.clone();
        let senders = self.senders.clone();
        let tasks = self.tasks.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let config = self.config.clone();
        let session_id = self.session_id.clone();

        let handle = tokio::spawn(async move {
            loop {
                if *state_rx.borrow_and_update() == ConnectionState::Connected {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            let senders = senders.lock();
            let mut tasks = tasks.lock();
            for sender in senders.iter() {
                match sender.start(&session_id, &config, cancel.child_token(), state.clone()) {
                    Ok(handle) => tasks.push(handle),
                    Err(e) => {
                        warn!("Failed to start {} sender: {}", sender.kind(), e);
                        let _ = state.send(ConnectionState::Failed);
                    }
                }
            }
        });

        self.tasks.lock().push(handle);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl PeerSession for PeerConnection {
    async fn add_track(&self, producer: Arc<dyn TrackProducer>) -> Result<()> {
        let sender = MediaSender::new(producer);
        let kind = sender.kind();

        let rtp_sender = self
            .pc
            .add_track(sender.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add {} track: {}", kind, e)))?;

        // Interceptors only see RTCP that somebody reads
        let cancel = self.cancel.clone();
        let rtcp = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = rtp_sender.read(&mut buf) => {
                        if read.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.tasks.lock().push(rtcp);
        self.senders.lock().push(sender);
        debug!("{} track added to peer {}", kind, self.session_id);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let sdp = RTCSessionDescription::offer(desc.sdp)
            .map_err(|e| AppError::Negotiation(format!("Invalid SDP offer: {}", e)))?;

        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<SessionDescription> {
        let answer = RTCSessionDescription::answer(desc.sdp.clone())
            .map_err(|e| AppError::Negotiation(format!("Invalid SDP answer: {}", e)))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc.set_local_description(answer).await.map_err(|e| {
            AppError::Negotiation(format!("Failed to set local description: {}", e))
        })?;

        // Signaling is not trickled, so the answer has to carry the candidates
        if tokio::time::timeout(ICE_GATHERING_TIMEOUT, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering for {} not complete after {:?}, answering anyway",
                self.session_id, ICE_GATHERING_TIMEOUT
            );
        }

        Ok(self
            .pc
            .local_description()
            .await
            .map(|d| SessionDescription::answer(d.sdp))
            .unwrap_or(desc))
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection {}: {}", self.session_id, e);
        }
        let _ = self.state.send(ConnectionState::Closed);
        info!("Peer connection {} closed", self.session_id);
    }
}
