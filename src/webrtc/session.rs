//! Peer sessions and their lifecycle
//!
//! Every accepted offer gets its own camera and microphone producers. A
//! session owns both exclusively; closing it stops the producers (releasing the
//! devices) before the peer is closed and before the session leaves the
//! registry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use super::signaling::{ConnectionState, StreamParams};
use super::transport::{PeerSession, SessionDescription, Transport};
use crate::audio::{AlsaDriver, AudioDriver, AudioTrackProducer, DeviceSelector};
use crate::config::{AppConfig, AudioConfig, SessionConfig, VideoConfig};
use crate::error::{AppError, Result};
use crate::media::TrackProducer;
use crate::video::{CameraDriver, CameraSettings, V4l2Camera, VideoTrackProducer};

/// Negotiation state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Negotiating,
    Active,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// One peer with its two producers
pub struct Session {
    id: String,
    video: Arc<dyn TrackProducer>,
    audio: Arc<dyn TrackProducer>,
    peer: Box<dyn PeerSession>,
    state: parking_lot::Mutex<SessionState>,
    created_at: DateTime<Utc>,
    closed: OnceCell<()>,
    slot: parking_lot::Mutex<Option<OwnedSemaphorePermit>>,
}

impl Session {
    pub fn new(
        id: String,
        video: Arc<dyn TrackProducer>,
        audio: Arc<dyn TrackProducer>,
        peer: Box<dyn PeerSession>,
    ) -> Self {
        Self {
            id,
            video,
            audio,
            peer,
            state: parking_lot::Mutex::new(SessionState::Created),
            created_at: Utc::now(),
            closed: OnceCell::new(),
            slot: parking_lot::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn peer(&self) -> &dyn PeerSession {
        self.peer.as_ref()
    }

    /// Keep a session-limit slot until the session closes
    fn hold_slot(&self, permit: OwnedSemaphorePermit) {
        *self.slot.lock() = Some(permit);
    }

    /// Move to `next`; refused once the session is closed
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Closed {
            debug!("Session {} is closed, ignoring transition to {}", self.id, next);
            return false;
        }
        debug!("Session {}: {} -> {}", self.id, *state, next);
        *state = next;
        true
    }

    /// Attach both producers and run the offer/answer exchange
    pub async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.peer.add_track(self.video.clone()).await?;
        self.peer.add_track(self.audio.clone()).await?;

        if !self.transition(SessionState::Negotiating) {
            return Err(AppError::Negotiation(format!("session {} closed", self.id)));
        }

        self.peer
            .set_remote_description(offer)
            .await
            .map_err(negotiation_error)?;
        let answer = self.peer.create_answer().await.map_err(negotiation_error)?;
        let answer = self
            .peer
            .set_local_description(answer)
            .await
            .map_err(negotiation_error)?;

        if !self.transition(SessionState::Active) {
            return Err(AppError::Negotiation(format!("session {} closed", self.id)));
        }
        Ok(answer)
    }

    /// Stop both producers, then the peer. Concurrent callers all return once
    /// the first close has finished.
    pub async fn close(&self) {
        self.closed
            .get_or_init(|| async {
                let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Closed);
                debug!("Closing session {} from {}", self.id, previous);

                tokio::join!(self.video.close(), self.audio.close());
                self.peer.close().await;
                self.slot.lock().take();

                let lifetime = Utc::now() - self.created_at;
                info!(
                    "Session {} closed after {}s",
                    self.id,
                    lifetime.num_seconds()
                );
            })
            .await;
    }
}

fn shutting_down() -> AppError {
    AppError::ServiceUnavailable("Server is shutting down".to_string())
}

fn negotiation_error(e: AppError) -> AppError {
    match e {
        AppError::Negotiation(_) => e,
        other => AppError::Negotiation(other.to_string()),
    }
}

/// Creates, tracks and tears down sessions
pub struct SessionManager {
    video: VideoConfig,
    audio: AudioConfig,
    limits: SessionConfig,
    slots: Option<Arc<Semaphore>>,
    camera: Arc<dyn CameraDriver>,
    microphone: Arc<dyn AudioDriver>,
    transport: Arc<dyn Transport>,
    registry: Arc<SessionRegistry>,
}

impl SessionManager {
    pub fn new(
        config: &AppConfig,
        camera: Arc<dyn CameraDriver>,
        microphone: Arc<dyn AudioDriver>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            video: config.video.clone(),
            audio: config.audio.clone(),
            limits: config.session.clone(),
            slots: (config.session.max_sessions > 0)
                .then(|| Arc::new(Semaphore::new(config.session.max_sessions))),
            camera,
            microphone,
            transport,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Manager backed by V4L2, ALSA and webrtc-rs
    pub fn with_system_devices(config: &AppConfig) -> Self {
        Self::new(
            config,
            Arc::new(V4l2Camera::new()),
            Arc::new(AlsaDriver::new()),
            Arc::new(super::peer::WebRtcTransport::new(config.stream.clone())),
        )
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    fn camera_settings(&self, params: StreamParams) -> CameraSettings {
        CameraSettings::new(
            self.video.device.clone(),
            params.width.unwrap_or(self.video.width),
            params.height.unwrap_or(self.video.height),
            params.fps.unwrap_or(self.video.fps),
        )
        .with_awb_mode(self.video.awb_mode.clone())
    }

    /// Select the microphone and start its capture worker
    async fn open_audio(&self) -> Result<AudioTrackProducer> {
        let driver = self.microphone.clone();
        let config = self.audio.clone();

        tokio::task::spawn_blocking(move || {
            let profile = DeviceSelector::new(driver.clone(), config.block_size)
                .with_device_index(config.device_index)
                .with_sample_rate(config.sample_rate)
                .select()?;
            AudioTrackProducer::open(driver, profile, config.gain_db)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Audio open task failed: {}", e)))?
    }

    /// Build a session for `offer` and return the local answer
    pub async fn handle_offer(
        &self,
        offer: SessionDescription,
        params: StreamParams,
    ) -> Result<SessionDescription> {
        if self.registry.is_closed().await {
            return Err(shutting_down());
        }

        // Held from here until the session closes, released on any early return
        let slot = match &self.slots {
            Some(slots) => Some(slots.clone().try_acquire_owned().map_err(|_| {
                AppError::ServiceUnavailable(format!(
                    "Maximum sessions ({}) reached",
                    self.limits.max_sessions
                ))
            })?),
            None => None,
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let settings = self.camera_settings(params);
        info!(
            "Creating session {} ({}x{} @ {} fps)",
            session_id, settings.width, settings.height, settings.fps
        );

        let video: Arc<dyn TrackProducer> =
            Arc::new(VideoTrackProducer::open(self.camera.clone(), settings).await?);

        let audio: Arc<dyn TrackProducer> = match self.open_audio().await {
            Ok(producer) => Arc::new(producer),
            Err(e) => {
                video.close().await;
                return Err(e);
            }
        };

        let peer = match self.transport.create_session(&session_id).await {
            Ok(peer) => peer,
            Err(e) => {
                tokio::join!(video.close(), audio.close());
                return Err(e);
            }
        };

        let session = Arc::new(Session::new(session_id, video, audio, peer));
        let answer = match session.negotiate(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Session {} negotiation failed: {}", session.id(), e);
                session.close().await;
                return Err(e);
            }
        };

        if let Some(permit) = slot {
            session.hold_slot(permit);
        }

        if !self.registry.insert(session.clone()).await {
            info!("Session {} negotiated during shutdown, closing", session.id());
            session.close().await;
            return Err(shutting_down());
        }
        self.spawn_watcher(session.clone());
        info!("Session {} active", session.id());

        Ok(answer)
    }

    /// Close and unregister the session once its peer is gone
    fn spawn_watcher(&self, session: Arc<Session>) {
        let registry = self.registry.clone();
        let mut state_rx = session.peer().state_watch();

        tokio::spawn(async move {
            loop {
                let state = *state_rx.borrow_and_update();
                if state.is_terminal() {
                    info!("Session {} peer {}, tearing down", session.id(), state);
                    break;
                }
                if state == ConnectionState::Disconnected {
                    debug!("Session {} peer disconnected, waiting", session.id());
                }
                if state_rx.changed().await.is_err() {
                    debug!("Session {} state channel closed", session.id());
                    break;
                }
            }

            session.close().await;
            registry.remove(session.id()).await;
        });
    }

    /// Close one session and unregister it
    pub async fn close_session(&self, id: &str) -> Result<()> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", id)))?;

        session.close().await;
        self.registry.remove(id).await;
        Ok(())
    }

    /// Stop accepting offers and close every registered session concurrently
    pub async fn shutdown(&self) {
        let sessions = self.registry.close().await;
        if sessions.is_empty() {
            return;
        }

        info!("Closing {} sessions", sessions.len());
        futures::future::join_all(sessions.iter().map(|s| s.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackKind;
    use crate::testing::{
        device, harness, harness_with, test_session, FakeAudioDriver, FakeCameraDriver,
        FakeTransport,
    };
    use crate::webrtc::transport::SdpType;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn offer() -> SessionDescription {
        SessionDescription::offer("v=0\r\n")
    }

    fn params(w: u32, h: u32, fps: u32) -> StreamParams {
        StreamParams {
            width: Some(w),
            height: Some(h),
            fps: Some(fps),
        }
    }

    async fn wait_for_count(manager: &SessionManager, expected: usize) {
        for _ in 0..100 {
            if manager.session_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session count never reached {}", expected);
    }

    #[tokio::test]
    async fn test_close_from_every_state() {
        for reached in [
            SessionState::Created,
            SessionState::Negotiating,
            SessionState::Active,
        ] {
            let (session, parts) = test_session("s");
            assert!(session.transition(reached));
            assert_eq!(session.state(), reached);

            session.close().await;
            assert_eq!(session.state(), SessionState::Closed);
            assert!(parts.video.is_closed());
            assert!(parts.audio.is_closed());
            assert!(parts.peer.is_closed());

            // Closed is terminal
            session.close().await;
            assert_eq!(parts.video.close_count(), 1);
            assert!(!session.transition(SessionState::Active));
            assert_eq!(session.state(), SessionState::Closed);
        }
    }

    #[tokio::test]
    async fn test_offer_opens_camera_with_requested_values() {
        let h = harness();
        let answer = h
            .manager
            .handle_offer(offer(), params(320, 240, 15))
            .await
            .unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);

        let opened = h.camera.opened().lock().clone();
        assert_eq!(opened.len(), 1);
        assert_eq!((opened[0].width, opened[0].height, opened[0].fps), (320, 240, 15));

        let peers = h.transport.peers().lock().clone();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].track_kinds(), vec![TrackKind::Video, TrackKind::Audio]);
        assert_eq!(peers[0].remote_description(), Some(offer()));

        let ids = h.manager.registry().ids().await;
        assert_eq!(ids.len(), 1);
        let session = h.manager.registry().get(&ids[0]).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);

        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_offer_uses_configured_defaults() {
        let mut config = AppConfig::default();
        config.video.device = PathBuf::from("/dev/video3");
        config.video.awb_mode = Some("daylight".into());
        let h = harness_with(
            config,
            FakeCameraDriver::new(),
            FakeAudioDriver::new(vec![device(0, "hw:1,0", "USB Mic", 1)]),
            FakeTransport::new(),
        );

        assert_ok!(h.manager.handle_offer(offer(), StreamParams::default()).await);

        let opened = h.camera.opened().lock().clone();
        assert_eq!((opened[0].width, opened[0].height, opened[0].fps), (640, 480, 20));
        assert_eq!(opened[0].device_path, PathBuf::from("/dev/video3"));
        assert_eq!(*h.camera.awb_modes().lock(), vec!["daylight".to_string()]);

        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_audio_failure_registers_nothing() {
        let h = harness_with(
            AppConfig::default(),
            FakeCameraDriver::new(),
            FakeAudioDriver::new(vec![device(0, "hw:0,0", "HDMI", 0)]),
            FakeTransport::new(),
        );

        let err = h
            .manager
            .handle_offer(offer(), StreamParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoInputDevice(_)));
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 0);
        assert!(h.transport.peers().lock().is_empty());
        assert_eq!(h.manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_negotiation_failure_releases_devices() {
        let h = harness_with(
            AppConfig::default(),
            FakeCameraDriver::new(),
            FakeAudioDriver::new(vec![device(0, "hw:1,0", "voiceHAT", 1)]),
            FakeTransport::new().rejecting_offers(),
        );

        let err = h
            .manager
            .handle_offer(offer(), StreamParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Negotiation(_)));
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 0);
        assert_eq!(h.audio.open_streams().load(Ordering::SeqCst), 0);
        assert!(h.transport.peers().lock()[0].is_closed());
        assert_eq!(h.manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_peer_is_torn_down() {
        let h = harness();
        h.manager
            .handle_offer(offer(), StreamParams::default())
            .await
            .unwrap();
        assert_eq!(h.manager.session_count().await, 1);

        h.transport.peers().lock()[0].set_state(ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.manager.session_count().await, 1);

        h.transport.peers().lock()[0].set_state(ConnectionState::Failed);
        wait_for_count(&h.manager, 0).await;
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 0);
        assert_eq!(h.audio.open_streams().load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let h = harness();
        for _ in 0..3 {
            h.manager
                .handle_offer(offer(), StreamParams::default())
                .await
                .unwrap();
        }
        assert_eq!(h.manager.session_count().await, 3);
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 3);

        h.manager.shutdown().await;

        assert_eq!(h.manager.session_count().await, 0);
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 0);
        assert_eq!(h.audio.open_streams().load(Ordering::SeqCst), 0);
        assert!(h.transport.peers().lock().iter().all(|p| p.is_closed()));
    }

    #[tokio::test]
    async fn test_close_session() {
        let h = harness();
        h.manager
            .handle_offer(offer(), StreamParams::default())
            .await
            .unwrap();
        let id = h.manager.registry().ids().await.remove(0);

        assert_ok!(h.manager.close_session(&id).await);
        assert_eq!(h.manager.session_count().await, 0);
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 0);

        let err = assert_err!(h.manager.close_session(&id).await);
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_session_limit() {
        let mut config = AppConfig::default();
        config.session.max_sessions = 1;
        let h = harness_with(
            config,
            FakeCameraDriver::new(),
            FakeAudioDriver::new(vec![device(0, "hw:1,0", "voiceHAT", 1)]),
            FakeTransport::new(),
        );

        assert_ok!(h.manager.handle_offer(offer(), StreamParams::default()).await);
        let err = h
            .manager
            .handle_offer(offer(), StreamParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert_eq!(h.camera.opened().lock().len(), 1);

        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_offers_respect_limit() {
        let mut config = AppConfig::default();
        config.session.max_sessions = 1;
        let h = harness_with(
            config,
            FakeCameraDriver::new(),
            FakeAudioDriver::new(vec![device(0, "hw:1,0", "voiceHAT", 1)]),
            FakeTransport::new().with_negotiation_delay(Duration::from_millis(50)),
        );

        let (a, b) = tokio::join!(
            h.manager.handle_offer(offer(), StreamParams::default()),
            h.manager.handle_offer(offer(), StreamParams::default()),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::ServiceUnavailable(_)))));
        assert_eq!(h.manager.session_count().await, 1);
        assert_eq!(h.camera.opened().lock().len(), 1);

        // Closing the session frees its slot
        let id = h.manager.registry().ids().await.remove(0);
        assert_ok!(h.manager.close_session(&id).await);
        assert_ok!(h.manager.handle_offer(offer(), StreamParams::default()).await);

        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_offer_in_flight_during_shutdown_is_closed() {
        let h = harness_with(
            AppConfig::default(),
            FakeCameraDriver::new(),
            FakeAudioDriver::new(vec![device(0, "hw:1,0", "voiceHAT", 1)]),
            FakeTransport::new().with_negotiation_delay(Duration::from_millis(150)),
        );

        let pending = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.handle_offer(offer(), StreamParams::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        h.manager.shutdown().await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert_eq!(h.manager.session_count().await, 0);
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 0);
        assert_eq!(h.audio.open_streams().load(Ordering::SeqCst), 0);
        assert!(h.transport.peers().lock()[0].is_closed());

        let err = assert_err!(h.manager.handle_offer(offer(), StreamParams::default()).await);
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert_eq!(h.camera.opened().lock().len(), 1);
    }

    #[tokio::test]
    async fn test_second_session_on_exclusive_camera_is_busy() {
        let h = harness_with(
            AppConfig::default(),
            FakeCameraDriver::new().exclusive(),
            FakeAudioDriver::new(vec![device(0, "hw:1,0", "voiceHAT", 1)]),
            FakeTransport::new(),
        );

        assert_ok!(h.manager.handle_offer(offer(), StreamParams::default()).await);
        let err = h
            .manager
            .handle_offer(offer(), StreamParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DeviceBusy { .. }));
        assert_eq!(h.manager.session_count().await, 1);
        assert_eq!(h.audio.open_streams().load(Ordering::SeqCst), 1);

        h.manager.shutdown().await;
        assert_eq!(h.camera.live_handles().load(Ordering::SeqCst), 0);
    }
}
