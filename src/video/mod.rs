//! Video capture and encoding
//!
//! - camera abstraction with a V4L2 implementation
//! - per-session paced capture producer
//! - I420 conversion and H.264 encoding for WebRTC

pub mod capture;
pub mod convert;
pub mod device;
pub mod encoder;
pub mod format;
pub mod v4l2;

pub use capture::VideoTrackProducer;
pub use device::{CameraDriver, CameraHandle, CameraSettings, CapturedFrame};
pub use encoder::{EncodedVideoFrame, VideoSampleEncoder};
pub use format::{PixelFormat, Resolution};
pub use v4l2::V4l2Camera;
