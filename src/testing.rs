//! In-memory drivers and transport used by the unit tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::audio::device::{AudioDeviceInfo, AudioDriver, AudioInputStream};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::media::{MediaFrame, Timebase, TrackKind, TrackProducer};
use crate::video::device::{CameraDriver, CameraHandle, CameraSettings, CapturedFrame};
use crate::video::format::PixelFormat;
use crate::webrtc::session::{Session, SessionManager};
use crate::webrtc::signaling::ConnectionState;
use crate::webrtc::transport::{PeerSession, SessionDescription, Transport};

/// Device entry with no reported default rate
pub fn device(index: usize, name: &str, description: &str, channels: u32) -> AudioDeviceInfo {
    AudioDeviceInfo {
        index,
        name: name.to_string(),
        description: description.to_string(),
        max_input_channels: channels,
        default_sample_rate: None,
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Audio driver that produces constant-valued blocks
pub struct FakeAudioDriver {
    devices: Vec<AudioDeviceInfo>,
    supported_rates: Option<Vec<u32>>,
    probes: Arc<Mutex<Vec<u32>>>,
    open_streams: Arc<AtomicUsize>,
    sample_value: i16,
    block_delay: Duration,
    fail_after: Option<usize>,
    busy: bool,
}

impl FakeAudioDriver {
    /// Accepts every rate unless restricted
    pub fn new(devices: Vec<AudioDeviceInfo>) -> Self {
        Self {
            devices,
            supported_rates: None,
            probes: Arc::new(Mutex::new(vec![])),
            open_streams: Arc::new(AtomicUsize::new(0)),
            sample_value: 1000,
            block_delay: Duration::ZERO,
            fail_after: None,
            busy: false,
        }
    }

    pub fn with_supported_rates(mut self, rates: &[u32]) -> Self {
        self.supported_rates = Some(rates.to_vec());
        self
    }

    pub fn with_sample_value(mut self, value: i16) -> Self {
        self.sample_value = value;
        self
    }

    pub fn with_block_delay(mut self, delay: Duration) -> Self {
        self.block_delay = delay;
        self
    }

    /// Reads fail after `blocks` successful ones
    pub fn with_fail_after(mut self, blocks: usize) -> Self {
        self.fail_after = Some(blocks);
        self
    }

    /// Probing or opening reports the device as busy
    pub fn with_busy(mut self) -> Self {
        self.busy = true;
        self
    }

    /// Rates passed to `check_settings`, in call order
    pub fn probes(&self) -> Arc<Mutex<Vec<u32>>> {
        self.probes.clone()
    }

    /// Streams currently open
    pub fn open_streams(&self) -> Arc<AtomicUsize> {
        self.open_streams.clone()
    }
}

impl AudioDriver for FakeAudioDriver {
    fn enumerate_devices(&self) -> Result<Vec<AudioDeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn check_settings(
        &self,
        device: &AudioDeviceInfo,
        sample_rate: u32,
        _channels: u32,
        _block_size: u32,
    ) -> Result<bool> {
        self.probes.lock().push(sample_rate);
        if self.busy {
            return Err(AppError::DeviceBusy {
                device: device.name.clone(),
                reason: "in use".to_string(),
            });
        }
        Ok(self
            .supported_rates
            .as_ref()
            .map_or(true, |rates| rates.contains(&sample_rate)))
    }

    fn open_input_stream(
        &self,
        device: &AudioDeviceInfo,
        _sample_rate: u32,
        _channels: u32,
        _block_size: u32,
    ) -> Result<Box<dyn AudioInputStream>> {
        if self.busy {
            return Err(AppError::DeviceBusy {
                device: device.name.clone(),
                reason: "in use".to_string(),
            });
        }

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInputStream {
            sample_value: self.sample_value,
            delay: self.block_delay,
            fail_after: self.fail_after,
            reads: 0,
            open: self.open_streams.clone(),
        }))
    }
}

struct FakeInputStream {
    sample_value: i16,
    delay: Duration,
    fail_after: Option<usize>,
    reads: usize,
    open: Arc<AtomicUsize>,
}

impl AudioInputStream for FakeInputStream {
    fn read(&mut self, buf: &mut [i16]) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_after == Some(self.reads) {
            return Err(AppError::AudioError("device unplugged".to_string()));
        }
        buf.fill(self.sample_value);
        self.reads += 1;
        Ok(())
    }
}

impl Drop for FakeInputStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

/// Scripted capture failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeCaptureError {
    Timeout,
    Lost,
}

/// Camera driver producing flat BGR24 frames at the requested size
#[derive(Default)]
pub struct FakeCameraDriver {
    live: Arc<AtomicUsize>,
    failures: Arc<Mutex<VecDeque<FakeCaptureError>>>,
    failing_awb: bool,
    awb_modes: Arc<Mutex<Vec<String>>>,
    opened: Arc<Mutex<Vec<CameraSettings>>>,
    exclusive: bool,
    capture_delay: Duration,
}

impl FakeCameraDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures fail in this order before frames flow
    pub fn with_failures(self, failures: impl IntoIterator<Item = FakeCaptureError>) -> Self {
        self.failures.lock().extend(failures);
        self
    }

    /// Every capture blocks this long
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn with_failing_awb(mut self) -> Self {
        self.failing_awb = true;
        self
    }

    /// A second open while a handle is live fails with `DeviceBusy`
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Handles not yet dropped
    pub fn live_handles(&self) -> Arc<AtomicUsize> {
        self.live.clone()
    }

    /// Modes successfully applied
    pub fn awb_modes(&self) -> Arc<Mutex<Vec<String>>> {
        self.awb_modes.clone()
    }

    /// Settings of every successful open
    pub fn opened(&self) -> Arc<Mutex<Vec<CameraSettings>>> {
        self.opened.clone()
    }
}

impl CameraDriver for FakeCameraDriver {
    fn open(&self, settings: &CameraSettings) -> Result<Box<dyn CameraHandle>> {
        if self.exclusive && self.live.load(Ordering::SeqCst) > 0 {
            return Err(AppError::DeviceBusy {
                device: settings.device_path.display().to_string(),
                reason: "camera already streaming".to_string(),
            });
        }

        self.opened.lock().push(settings.clone());
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCamera {
            settings: settings.clone(),
            failures: self.failures.clone(),
            failing_awb: self.failing_awb,
            awb_modes: self.awb_modes.clone(),
            live: self.live.clone(),
            delay: self.capture_delay,
        }))
    }
}

struct FakeCamera {
    settings: CameraSettings,
    failures: Arc<Mutex<VecDeque<FakeCaptureError>>>,
    failing_awb: bool,
    awb_modes: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
    delay: Duration,
}

impl CameraHandle for FakeCamera {
    fn capture_frame(&mut self) -> Result<CapturedFrame> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let device = self.settings.device_path.display().to_string();
        match self.failures.lock().pop_front() {
            Some(FakeCaptureError::Timeout) => return Err(AppError::CaptureTimeout(device)),
            Some(FakeCaptureError::Lost) => {
                return Err(AppError::VideoDeviceLost {
                    device,
                    reason: "ENODEV".to_string(),
                })
            }
            None => {}
        }

        let resolution = self.settings.resolution();
        Ok(CapturedFrame {
            data: Bytes::from(vec![0x80; PixelFormat::Bgr24.frame_size(resolution)]),
            resolution,
            pixel_format: PixelFormat::Bgr24,
            stride: resolution.width * 3,
        })
    }

    fn set_awb_mode(&mut self, mode: &str) -> Result<()> {
        if self.failing_awb {
            return Err(AppError::VideoError("AWB control not supported".to_string()));
        }
        self.awb_modes.lock().push(mode.to_string());
        Ok(())
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// Producer returning a fixed script of results, then waiting until closed
pub struct ScriptedProducer {
    kind: TrackKind,
    timebase: Timebase,
    script: Mutex<VecDeque<Result<MediaFrame>>>,
    cancel: CancellationToken,
    closes: AtomicUsize,
}

impl ScriptedProducer {
    pub fn audio(script: Vec<Result<MediaFrame>>) -> Self {
        Self::new(TrackKind::Audio, Timebase::per(48000), script)
    }

    pub fn video(script: Vec<Result<MediaFrame>>) -> Self {
        Self::new(TrackKind::Video, Timebase::per(20), script)
    }

    fn new(kind: TrackKind, timebase: Timebase, script: Vec<Result<MediaFrame>>) -> Self {
        Self {
            kind,
            timebase,
            script: Mutex::new(script.into()),
            cancel: CancellationToken::new(),
            closes: AtomicUsize::new(0),
        }
    }

    /// Times `close` did any work
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackProducer for ScriptedProducer {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn timebase(&self) -> Timebase {
        self.timebase
    }

    async fn next_frame(&self) -> Result<MediaFrame> {
        if self.cancel.is_cancelled() {
            return Err(AppError::ProducerClosed("scripted"));
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result,
            None => {
                self.cancel.cancelled().await;
                Err(AppError::ProducerClosed("scripted"))
            }
        }
    }

    async fn close(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Test-side view of a fake peer
#[derive(Clone)]
pub struct FakePeerHandle {
    state: Arc<watch::Sender<ConnectionState>>,
    tracks: Arc<Mutex<Vec<TrackKind>>>,
    remote: Arc<Mutex<Option<SessionDescription>>>,
    closed: Arc<AtomicBool>,
}

impl FakePeerHandle {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        Self {
            state: Arc::new(state),
            tracks: Arc::new(Mutex::new(vec![])),
            remote: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report a connection state as the transport would
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.tracks.lock().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Peer that answers every offer without touching the network
pub struct FakePeer {
    handle: FakePeerHandle,
    reject_offer: bool,
    negotiation_delay: Duration,
}

impl FakePeer {
    pub fn new() -> (Self, FakePeerHandle) {
        let handle = FakePeerHandle::new();
        (
            Self {
                handle: handle.clone(),
                reject_offer: false,
                negotiation_delay: Duration::ZERO,
            },
            handle,
        )
    }
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn add_track(&self, producer: Arc<dyn TrackProducer>) -> Result<()> {
        self.handle.tracks.lock().push(producer.kind());
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if !self.negotiation_delay.is_zero() {
            tokio::time::sleep(self.negotiation_delay).await;
        }
        if self.reject_offer {
            return Err(AppError::Negotiation("offer rejected".to_string()));
        }
        *self.handle.remote.lock() = Some(desc);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("v=0\r\ns=fake-answer\r\n"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<SessionDescription> {
        Ok(desc)
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.handle.state.subscribe()
    }

    async fn close(&self) {
        self.handle.closed.store(true, Ordering::SeqCst);
        self.handle.state.send_replace(ConnectionState::Closed);
    }
}

/// Transport handing out [`FakePeer`]s
#[derive(Default)]
pub struct FakeTransport {
    reject_offers: bool,
    negotiation_delay: Duration,
    peers: Arc<Mutex<Vec<FakePeerHandle>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every peer refuses the remote offer
    pub fn rejecting_offers(mut self) -> Self {
        self.reject_offers = true;
        self
    }

    /// Applying the remote offer takes this long
    pub fn with_negotiation_delay(mut self, delay: Duration) -> Self {
        self.negotiation_delay = delay;
        self
    }

    /// Handles of every peer created so far
    pub fn peers(&self) -> Arc<Mutex<Vec<FakePeerHandle>>> {
        self.peers.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn create_session(&self, _session_id: &str) -> Result<Box<dyn PeerSession>> {
        let (mut peer, handle) = FakePeer::new();
        peer.reject_offer = self.reject_offers;
        peer.negotiation_delay = self.negotiation_delay;
        self.peers.lock().push(handle);
        Ok(Box::new(peer))
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Pieces of a session built by [`test_session`]
pub struct SessionParts {
    pub video: Arc<ScriptedProducer>,
    pub audio: Arc<ScriptedProducer>,
    pub peer: FakePeerHandle,
}

/// Session over scripted producers and a fake peer, in state `Created`
pub fn test_session(id: &str) -> (Arc<Session>, SessionParts) {
    let video = Arc::new(ScriptedProducer::video(vec![]));
    let audio = Arc::new(ScriptedProducer::audio(vec![]));
    let (peer, handle) = FakePeer::new();

    let session = Arc::new(Session::new(
        id.to_string(),
        video.clone(),
        audio.clone(),
        Box::new(peer),
    ));

    (
        session,
        SessionParts {
            video,
            audio,
            peer: handle,
        },
    )
}

/// Session manager wired to fakes, with the fakes kept for inspection
pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub camera: Arc<FakeCameraDriver>,
    pub audio: Arc<FakeAudioDriver>,
    pub transport: Arc<FakeTransport>,
}

/// Default configuration, one voiceHAT microphone
pub fn harness() -> Harness {
    harness_with(
        AppConfig::default(),
        FakeCameraDriver::new(),
        FakeAudioDriver::new(vec![device(0, "hw:1,0", "Google voiceHAT", 1)]),
        FakeTransport::new(),
    )
}

pub fn harness_with(
    config: AppConfig,
    camera: FakeCameraDriver,
    audio: FakeAudioDriver,
    transport: FakeTransport,
) -> Harness {
    let camera = Arc::new(camera);
    let audio = Arc::new(audio);
    let transport = Arc::new(transport);

    let manager = Arc::new(SessionManager::new(
        &config,
        camera.clone(),
        audio.clone(),
        transport.clone(),
    ));

    Harness {
        manager,
        camera,
        audio,
        transport,
    }
}
