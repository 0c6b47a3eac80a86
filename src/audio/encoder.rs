//! Opus encoding of captured PCM for WebRTC
//!
//! Capture runs at whatever rate the device accepted; Opus on the wire is
//! 48 kHz with 20 ms frames. [`AudioSampleEncoder`] bridges the two: linear
//! resampling, rebuffering into 960-sample frames, then Opus.

use audiopus::coder::GenericCtl;
use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use std::time::Duration;
use tracing::{info, trace};

use crate::error::{AppError, Result};
use crate::media::{FrameFormat, MediaFrame};

/// Opus wire rate
pub const OPUS_SAMPLE_RATE: u32 = 48000;

/// Samples per 20 ms Opus frame at 48 kHz
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Largest packet libopus will produce
const MAX_OPUS_PACKET: usize = 4000;

/// Opus encoder configuration
#[derive(Debug, Clone)]
pub struct OpusConfig {
    /// Channels (1 or 2)
    pub channels: u32,
    /// Target bitrate in bps
    pub bitrate: u32,
    /// Application mode
    pub application: OpusApplication,
    /// Enable forward error correction
    pub fec: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            bitrate: 32000,
            application: OpusApplication::Voip,
            fec: true,
        }
    }
}

impl OpusConfig {
    fn to_audiopus_channels(&self) -> Channels {
        if self.channels == 1 {
            Channels::Mono
        } else {
            Channels::Stereo
        }
    }

    fn to_audiopus_application(&self) -> Application {
        match self.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        }
    }
}

/// Opus application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusApplication {
    Voip,
    Audio,
    LowDelay,
}

/// One encoded Opus packet
#[derive(Debug, Clone)]
pub struct OpusFrame {
    pub data: Bytes,
    pub duration: Duration,
}

/// 48 kHz Opus encoder
pub struct OpusEncoder {
    config: OpusConfig,
    encoder: Encoder,
    output_buffer: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(config: OpusConfig) -> Result<Self> {
        let mut encoder = Encoder::new(
            SampleRate::Hz48000,
            config.to_audiopus_channels(),
            config.to_audiopus_application(),
        )
        .map_err(|e| AppError::AudioError(format!("Failed to create Opus encoder: {:?}", e)))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(config.bitrate as i32))
            .map_err(|e| AppError::AudioError(format!("Failed to set bitrate: {:?}", e)))?;

        if config.fec {
            encoder
                .set_inband_fec(true)
                .map_err(|e| AppError::AudioError(format!("Failed to enable FEC: {:?}", e)))?;
        }

        info!(
            "Opus encoder created: {}Hz {}ch {}bps",
            OPUS_SAMPLE_RATE, config.channels, config.bitrate
        );

        Ok(Self {
            config,
            encoder,
            output_buffer: vec![0u8; MAX_OPUS_PACKET],
        })
    }

    /// Encode exactly one 20 ms frame of interleaved S16 samples
    pub fn encode(&mut self, pcm: &[i16]) -> Result<OpusFrame> {
        let encoded_len = self
            .encoder
            .encode(pcm, &mut self.output_buffer)
            .map_err(|e| AppError::AudioError(format!("Opus encode failed: {:?}", e)))?;

        let samples = pcm.len() as u64 / self.config.channels.max(1) as u64;
        trace!("Encoded {} samples to {} bytes Opus", pcm.len(), encoded_len);

        Ok(OpusFrame {
            data: Bytes::copy_from_slice(&self.output_buffer[..encoded_len]),
            duration: Duration::from_micros(samples * 1_000_000 / OPUS_SAMPLE_RATE as u64),
        })
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

/// Streaming linear-interpolation resampler for mono S16
///
/// Keeps the last input sample and the fractional read position between
/// blocks so consecutive blocks join without a seam.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    in_rate: u32,
    out_rate: u32,
    /// Read position in input samples, 0 addressing `prev`
    pos: f64,
    prev: i16,
}

impl LinearResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self {
            in_rate: in_rate.max(1),
            out_rate: out_rate.max(1),
            pos: 1.0,
            prev: 0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.in_rate == self.out_rate
    }

    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        let step = self.in_rate as f64 / self.out_rate as f64;
        let len = input.len();
        let at = |i: usize| if i == 0 { self.prev } else { input[i - 1] };

        let mut out = Vec::with_capacity((len as f64 / step) as usize + 2);
        let mut t = self.pos;
        while t <= len as f64 {
            let idx = t.floor() as usize;
            let frac = t - idx as f64;
            let s0 = at(idx) as f64;
            let s1 = at((idx + 1).min(len)) as f64;
            let v = s0 + (s1 - s0) * frac;
            out.push(v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            t += step;
        }

        self.pos = t - len as f64;
        self.prev = input[len - 1];
        out
    }
}

/// Turns producer audio frames into Opus packets
pub struct AudioSampleEncoder {
    resampler: Option<LinearResampler>,
    pending: Vec<i16>,
    opus: OpusEncoder,
}

impl AudioSampleEncoder {
    pub fn new(config: OpusConfig) -> Result<Self> {
        Ok(Self {
            resampler: None,
            pending: Vec::with_capacity(OPUS_FRAME_SAMPLES * 2),
            opus: OpusEncoder::new(config)?,
        })
    }

    /// Feed one captured frame; returns every complete Opus packet it yields
    pub fn encode(&mut self, frame: &MediaFrame) -> Result<Vec<OpusFrame>> {
        let FrameFormat::Audio { sample_rate, .. } = frame.format else {
            return Err(AppError::AudioError(
                "Audio encoder received a video frame".to_string(),
            ));
        };

        let samples = frame.pcm_samples();
        let resampler = self
            .resampler
            .get_or_insert_with(|| LinearResampler::new(sample_rate, OPUS_SAMPLE_RATE));
        let resampled = resampler.process(&samples);
        self.pending.extend_from_slice(&resampled);

        let mut packets = Vec::new();
        while self.pending.len() >= OPUS_FRAME_SAMPLES {
            let chunk: Vec<i16> = self.pending.drain(..OPUS_FRAME_SAMPLES).collect();
            packets.push(self.opus.encode(&chunk)?);
        }
        Ok(packets)
    }
}
