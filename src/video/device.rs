//! Camera hardware abstraction

use bytes::Bytes;
use serde::Serialize;
use std::path::PathBuf;

use super::format::{PixelFormat, Resolution};
use crate::error::{AppError, Result};

/// Requested capture parameters for one producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraSettings {
    /// V4L2 node, e.g. /dev/video0
    pub device_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Layout asked of the driver; it may negotiate another
    pub pixel_format: PixelFormat,
    /// Auto-white-balance mode name, applied best-effort after start
    pub awb_mode: Option<String>,
}

impl CameraSettings {
    pub fn new(device_path: impl Into<PathBuf>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            device_path: device_path.into(),
            width,
            height,
            fps,
            pixel_format: PixelFormat::Bgr24,
            awb_mode: None,
        }
    }

    pub fn with_awb_mode(mut self, mode: Option<String>) -> Self {
        self.awb_mode = mode.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Reject zero dimensions or rate
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AppError::BadRequest(format!(
                "Invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(AppError::BadRequest("fps must be positive".to_string()));
        }
        Ok(())
    }
}

/// One raw frame straight from the camera
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    pub stride: u32,
}

/// Running camera. Stops streaming and releases the device on drop.
pub trait CameraHandle: Send {
    /// Block until the next frame is available
    ///
    /// A timeout is reported as `CaptureTimeout`; a vanished device as
    /// `VideoDeviceLost`.
    fn capture_frame(&mut self) -> Result<CapturedFrame>;

    /// Apply an auto-white-balance mode by name
    fn set_awb_mode(&mut self, mode: &str) -> Result<()>;
}

/// Opens cameras
pub trait CameraDriver: Send + Sync {
    /// Configure and start the camera, blocking until it streams
    fn open(&self, settings: &CameraSettings) -> Result<Box<dyn CameraHandle>>;
}
