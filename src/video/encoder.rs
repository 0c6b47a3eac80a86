//! H.264 encoding of camera frames via openh264

use bytes::Bytes;
use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;
use std::time::Duration;
use tracing::{debug, info};

use super::convert::to_i420;
use super::format::Resolution;
use crate::error::{AppError, Result};
use crate::media::{FrameFormat, MediaFrame};

/// Seconds between forced IDR frames
const KEYFRAME_INTERVAL_SECS: u64 = 2;

/// One Annex B access unit
#[derive(Debug, Clone)]
pub struct EncodedVideoFrame {
    pub data: Bytes,
    pub is_keyframe: bool,
    pub duration: Duration,
}

/// Turns producer video frames into H.264 samples
pub struct VideoSampleEncoder {
    encoder: Option<Encoder>,
    resolution: Option<Resolution>,
    frames_encoded: u64,
}

impl VideoSampleEncoder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            resolution: None,
            frames_encoded: 0,
        }
    }

    /// Encoder is (re)built whenever the picture size changes
    fn encoder_for(&mut self, resolution: Resolution) -> Result<&mut Encoder> {
        if self.resolution != Some(resolution) || self.encoder.is_none() {
            let encoder = Encoder::new().map_err(|e| {
                AppError::VideoError(format!("Failed to create H.264 encoder: {}", e))
            })?;
            info!("H.264 encoder created for {}", resolution);
            self.encoder = Some(encoder);
            self.resolution = Some(resolution);
            self.frames_encoded = 0;
        }
        self.encoder
            .as_mut()
            .ok_or_else(|| AppError::Internal("H.264 encoder missing".to_string()))
    }

    pub fn encode(&mut self, frame: &MediaFrame) -> Result<EncodedVideoFrame> {
        let FrameFormat::Video {
            resolution,
            pixel_format,
            stride,
        } = frame.format
        else {
            return Err(AppError::VideoError(
                "Video encoder received an audio frame".to_string(),
            ));
        };

        let yuv = to_i420(&frame.payload, resolution, pixel_format, stride)?;
        let out_res = yuv.resolution();
        let fps = frame.timebase.den.max(1) as u64 / frame.timebase.num.max(1) as u64;
        let keyframe_every = (fps.max(1) * KEYFRAME_INTERVAL_SECS).max(1);
        let frames_encoded = self.frames_encoded;

        let encoder = self.encoder_for(out_res)?;
        if frames_encoded > 0 && frames_encoded % keyframe_every == 0 {
            encoder.force_intra_frame();
        }

        let buffer = YUVBuffer::from_vec(
            yuv.into_vec(),
            out_res.width as usize,
            out_res.height as usize,
        );
        let bitstream = encoder
            .encode(&buffer)
            .map_err(|e| AppError::VideoError(format!("H.264 encode failed: {}", e)))?;

        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = bitstream.to_vec();
        self.frames_encoded += 1;

        if is_keyframe {
            debug!("Encoded keyframe: {} bytes", data.len());
        }

        Ok(EncodedVideoFrame {
            data: Bytes::from(data),
            is_keyframe,
            duration: frame.duration(),
        })
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

// SAFETY: owned and driven by a single sender task, never shared between threads
unsafe impl Send for VideoSampleEncoder {}

impl Default for VideoSampleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Timebase;
    use crate::video::format::PixelFormat;

    fn bgr_frame(w: u32, h: u32, pts: u64) -> MediaFrame {
        MediaFrame {
            payload: Bytes::from(vec![128u8; (w * h * 3) as usize]),
            pts,
            timebase: Timebase::per(20),
            format: FrameFormat::Video {
                resolution: Resolution::new(w, h),
                pixel_format: PixelFormat::Bgr24,
                stride: w * 3,
            },
        }
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let mut encoder = VideoSampleEncoder::new();
        let out = encoder.encode(&bgr_frame(64, 48, 0)).unwrap();
        assert!(out.is_keyframe);
        assert!(out.data.starts_with(&[0, 0, 0, 1]) || out.data.starts_with(&[0, 0, 1]));
        assert_eq!(out.duration, Duration::from_millis(50));
        assert_eq!(encoder.frames_encoded(), 1);
    }

    #[test]
    fn test_resolution_change_restarts_encoder() {
        let mut encoder = VideoSampleEncoder::new();
        encoder.encode(&bgr_frame(64, 48, 0)).unwrap();
        encoder.encode(&bgr_frame(64, 48, 1)).unwrap();
        let out = encoder.encode(&bgr_frame(32, 32, 2)).unwrap();
        assert!(out.is_keyframe);
        assert_eq!(encoder.frames_encoded(), 1);
    }
}
