//! Timestamped media frames shared by the audio and video producers

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

use crate::video::format::{PixelFormat, Resolution};

/// Rational unit in which a track's timestamps are expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    /// Create a timebase, `den` must be non-zero
    pub fn new(num: u32, den: u32) -> Self {
        debug_assert!(den > 0, "timebase denominator must be non-zero");
        Self { num, den }
    }

    /// 1/rate, e.g. 1/fps for video or 1/sample_rate for audio
    pub fn per(rate: u32) -> Self {
        Self::new(1, rate)
    }

    /// Wall-clock length of `ticks` units of this timebase
    pub fn to_duration(&self, ticks: u64) -> Duration {
        let nanos = (ticks as u128 * self.num as u128 * 1_000_000_000) / self.den.max(1) as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Payload layout of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Raw picture in the camera's native layout
    Video {
        resolution: Resolution,
        pixel_format: PixelFormat,
        stride: u32,
    },
    /// Interleaved S16LE PCM
    Audio {
        sample_rate: u32,
        channels: u32,
        samples: u32,
    },
}

/// One timestamped frame of a track
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Raw payload bytes
    pub payload: Bytes,
    /// Presentation timestamp in `timebase` units
    pub pts: u64,
    /// Constant for the lifetime of the track
    pub timebase: Timebase,
    /// Payload layout
    pub format: FrameFormat,
}

impl MediaFrame {
    pub fn kind(&self) -> TrackKind {
        match self.format {
            FrameFormat::Video { .. } => TrackKind::Video,
            FrameFormat::Audio { .. } => TrackKind::Audio,
        }
    }

    /// Number of timebase ticks this frame covers
    pub fn ticks(&self) -> u64 {
        match self.format {
            FrameFormat::Video { .. } => 1,
            FrameFormat::Audio { samples, .. } => samples as u64,
        }
    }

    /// Playback duration of this frame
    pub fn duration(&self) -> Duration {
        self.timebase.to_duration(self.ticks())
    }

    /// Decode an audio payload into samples
    pub fn pcm_samples(&self) -> Vec<i16> {
        self.payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
