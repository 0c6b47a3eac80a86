//! Sample tracks and the sender tasks that feed them
//!
//! Each attached producer gets one `TrackLocalStaticSample` and, once the peer
//! is connected, one sender task that pulls frames, encodes them and writes
//! samples until the producer closes or the session is cancelled.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::config::WebRtcConfig;
use super::signaling::ConnectionState;
use crate::audio::encoder::{AudioSampleEncoder, OpusConfig};
use crate::error::Result;
use crate::media::{MediaFrame, TrackKind, TrackProducer};
use crate::utils::LogThrottler;
use crate::video::encoder::VideoSampleEncoder;
use crate::warn_throttled;

/// RTP clock for video
pub const VIDEO_CLOCK_RATE: u32 = 90000;

/// Stream id shared by both tracks of a session
pub const STREAM_ID: &str = "picam";

/// H.264 constrained baseline, packetization mode 1
pub fn video_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/H264".to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            .to_string(),
        rtcp_feedback: vec![],
    }
}

/// Create RTP codec capability for audio (Opus)
pub fn audio_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Per-kind encoder state
enum SampleEncoder {
    Audio(AudioSampleEncoder),
    Video(VideoSampleEncoder),
}

impl SampleEncoder {
    fn for_kind(kind: TrackKind, config: &WebRtcConfig) -> Result<Self> {
        Ok(match kind {
            TrackKind::Audio => SampleEncoder::Audio(AudioSampleEncoder::new(OpusConfig {
                bitrate: config.audio_bitrate,
                ..Default::default()
            })?),
            TrackKind::Video => SampleEncoder::Video(VideoSampleEncoder::new()),
        })
    }

    fn encode(&mut self, frame: &MediaFrame) -> Result<Vec<Sample>> {
        match self {
            SampleEncoder::Audio(encoder) => Ok(encoder
                .encode(frame)?
                .into_iter()
                .map(|packet| Sample {
                    data: packet.data,
                    duration: packet.duration,
                    ..Default::default()
                })
                .collect()),
            SampleEncoder::Video(encoder) => {
                let encoded = encoder.encode(frame)?;
                Ok(vec![Sample {
                    data: encoded.data,
                    duration: encoded.duration,
                    ..Default::default()
                }])
            }
        }
    }
}

/// One producer bound to one outgoing track
pub struct MediaSender {
    kind: TrackKind,
    producer: Arc<dyn TrackProducer>,
    track: Arc<TrackLocalStaticSample>,
}

impl MediaSender {
    pub fn new(producer: Arc<dyn TrackProducer>) -> Self {
        let kind = producer.kind();
        let capability = match kind {
            TrackKind::Audio => audio_codec_capability(),
            TrackKind::Video => video_codec_capability(),
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            kind.to_string(),
            STREAM_ID.to_string(),
        ));

        Self {
            kind,
            producer,
            track,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Spawn the sender task
    ///
    /// A terminal producer or encoder failure is published as `Failed` on
    /// `state` so the session owner tears the session down.
    pub fn start(
        &self,
        session_id: &str,
        config: &WebRtcConfig,
        cancel: CancellationToken,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Result<JoinHandle<()>> {
        let encoder = SampleEncoder::for_kind(self.kind, config)?;
        let producer = self.producer.clone();
        let track = self.track.clone();
        let kind = self.kind;
        let session_id = session_id.to_string();

        info!("Starting {} sender for session {}", kind, session_id);

        Ok(tokio::spawn(async move {
            let failed = run_sender(kind, producer, track, encoder, cancel).await;
            if failed {
                let _ = state.send(ConnectionState::Failed);
            }
            info!("{} sender for session {} stopped", kind, session_id);
        }))
    }
}

/// Pump frames until cancelled or closed; returns true on terminal failure
async fn run_sender(
    kind: TrackKind,
    producer: Arc<dyn TrackProducer>,
    track: Arc<TrackLocalStaticSample>,
    mut encoder: SampleEncoder,
    cancel: CancellationToken,
) -> bool {
    let throttler = LogThrottler::with_secs(5);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            next = producer.next_frame() => next,
        };

        let frame = match next {
            Ok(frame) => frame,
            Err(e) if e.is_closed() => {
                debug!("{} producer closed", kind);
                return false;
            }
            Err(e) if e.is_transient() => {
                warn_throttled!(throttler, "capture", "{} capture hiccup: {}", kind, e);
                continue;
            }
            Err(e) => {
                error!("{} track failed: {}", kind, e);
                return true;
            }
        };

        let samples = match encoder.encode(&frame) {
            Ok(samples) => samples,
            Err(e) => {
                error!("{} encoder failed: {}", kind, e);
                return true;
            }
        };

        for sample in samples {
            if let Err(e) = track.write_sample(&sample).await {
                warn_throttled!(throttler, "write", "{} write_sample failed: {}", kind, e);
            }
        }
    }
}
