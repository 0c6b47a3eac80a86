//! V4L2 camera backed by the `v4l` crate (mmap streaming)

use bytes::Bytes;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::control::{Control, Description, MenuItem, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;

use super::device::{CameraDriver, CameraHandle, CameraSettings, CapturedFrame};
use super::format::{PixelFormat, Resolution};
use crate::error::{AppError, Result};

const BUFFER_COUNT: u32 = 4;
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);
/// Settle time between stream start and the first control write
const WARM_UP: Duration = Duration::from_millis(200);

const V4L2_CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const V4L2_CID_AUTO_N_PRESET_WHITE_BALANCE: u32 = 0x009a_0914;

const EIO: i32 = 5;
const ENXIO: i32 = 6;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EPIPE: i32 = 32;
const ESHUTDOWN: i32 = 108;

/// Camera driver for V4L2 capture nodes
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Camera;

impl V4l2Camera {
    pub fn new() -> Self {
        Self
    }
}

impl CameraDriver for V4l2Camera {
    fn open(&self, settings: &CameraSettings) -> Result<Box<dyn CameraHandle>> {
        let path = settings.device_path.display().to_string();
        debug!("Opening camera {}", path);

        let device = Device::with_path(&settings.device_path).map_err(|e| open_error(&path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| AppError::VideoError(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(AppError::VideoError(format!(
                "{} ({}) is not a capture device",
                path, caps.card
            )));
        }

        let mut fmt = device
            .format()
            .map_err(|e| AppError::VideoError(format!("Failed to get device format: {}", e)))?;
        fmt.width = settings.width;
        fmt.height = settings.height;
        fmt.fourcc = settings.pixel_format.to_fourcc();

        let actual = device.set_format(&fmt).map_err(|e| open_error(&path, e))?;
        let pixel_format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
            AppError::VideoError(format!(
                "Camera negotiated unsupported format {}",
                actual.fourcc
            ))
        })?;
        let resolution = Resolution::new(actual.width, actual.height);
        if resolution != settings.resolution() || pixel_format != settings.pixel_format {
            warn!(
                "Camera negotiated {} {} instead of {} {}",
                resolution,
                pixel_format,
                settings.resolution(),
                settings.pixel_format
            );
        }
        let stride = if actual.stride > 0 {
            actual.stride
        } else {
            pixel_format.min_stride(resolution.width)
        };

        if let Err(e) = device.set_params(&Parameters::with_fps(settings.fps)) {
            warn!("Failed to set hardware FPS: {}", e);
        }

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| AppError::VideoError(format!("Failed to request buffers: {}", e)))?;
        stream.set_timeout(CAPTURE_TIMEOUT);
        stream.start().map_err(|e| open_error(&path, e))?;

        std::thread::sleep(WARM_UP);

        info!(
            "Camera {} ({}) streaming {} {} stride={} @ {} fps",
            path, caps.card, resolution, pixel_format, stride, settings.fps
        );

        Ok(Box::new(V4l2CameraHandle {
            stream,
            device,
            device_path: path,
            resolution,
            pixel_format,
            stride,
        }))
    }
}

/// Streaming camera; the stream field drops first so STREAMOFF precedes close
struct V4l2CameraHandle {
    stream: Stream<'static>,
    device: Device,
    device_path: String,
    resolution: Resolution,
    pixel_format: PixelFormat,
    stride: u32,
}

impl CameraHandle for V4l2CameraHandle {
    fn capture_frame(&mut self) -> Result<CapturedFrame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| capture_error(&self.device_path, e))?;

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };

        Ok(CapturedFrame {
            data: Bytes::copy_from_slice(&buf[..used]),
            resolution: self.resolution,
            pixel_format: self.pixel_format,
            stride: self.stride,
        })
    }

    fn set_awb_mode(&mut self, mode: &str) -> Result<()> {
        let controls = self
            .device
            .query_controls()
            .map_err(|e| AppError::VideoError(format!("Failed to query controls: {}", e)))?;

        let control = awb_control(&controls, mode).ok_or_else(|| {
            AppError::VideoError(format!(
                "White balance mode '{}' not supported by {}",
                mode, self.device_path
            ))
        })?;

        self.device
            .set_control(control)
            .map_err(|e| AppError::VideoError(format!("Failed to set white balance: {}", e)))?;
        info!("Camera {} white balance set to {}", self.device_path, mode);
        Ok(())
    }
}

fn open_error(path: &str, e: io::Error) -> AppError {
    if e.raw_os_error() == Some(EBUSY) {
        AppError::DeviceBusy {
            device: path.to_string(),
            reason: e.to_string(),
        }
    } else {
        AppError::VideoError(format!("Failed to open device {}: {}", path, e))
    }
}

fn capture_error(path: &str, e: io::Error) -> AppError {
    if e.kind() == io::ErrorKind::TimedOut {
        return AppError::CaptureTimeout(path.to_string());
    }
    match e.raw_os_error() {
        Some(ENXIO | ENODEV | EIO | EPIPE | ESHUTDOWN) => AppError::VideoDeviceLost {
            device: path.to_string(),
            reason: e.to_string(),
        },
        _ => AppError::VideoError(format!("Capture error on {}: {}", path, e)),
    }
}

/// Control write that selects `mode`, preferring the preset menu
fn awb_control(controls: &[Description], mode: &str) -> Option<Control> {
    let preset = controls
        .iter()
        .find(|c| c.id == V4L2_CID_AUTO_N_PRESET_WHITE_BALANCE);
    let auto = controls.iter().find(|c| c.id == V4L2_CID_AUTO_WHITE_BALANCE);

    if let Some(items) = preset.and_then(|c| c.items.as_deref()) {
        if let Some(index) = find_menu_index(items, mode) {
            return Some(Control {
                id: V4L2_CID_AUTO_N_PRESET_WHITE_BALANCE,
                value: Value::Integer(index as i64),
            });
        }
    }

    let enable = match normalize(mode).as_str() {
        "auto" => true,
        "off" | "manual" => false,
        _ => return None,
    };
    auto.map(|_| Control {
        id: V4L2_CID_AUTO_WHITE_BALANCE,
        value: Value::Boolean(enable),
    })
}

/// Menu index whose name matches the mode, case and punctuation insensitive
fn find_menu_index(items: &[(u32, MenuItem)], mode: &str) -> Option<u32> {
    let wanted = match normalize(mode).as_str() {
        "tungsten" => "incandescent".to_string(),
        "indoor" => "fluorescent".to_string(),
        other => other.to_string(),
    };

    items.iter().find_map(|(index, item)| match item {
        MenuItem::Name(name) if normalize(name) == wanted => Some(*index),
        _ => None,
    })
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset_items() -> Vec<(u32, MenuItem)> {
        ["Manual", "Auto", "Incandescent", "Fluorescent", "Fluorescent H", "Daylight", "Cloudy"]
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u32, MenuItem::Name(n.to_string())))
            .collect()
    }

    #[test]
    fn test_menu_lookup_is_case_insensitive() {
        let items = preset_items();
        assert_eq!(find_menu_index(&items, "daylight"), Some(5));
        assert_eq!(find_menu_index(&items, "CLOUDY"), Some(6));
        assert_eq!(find_menu_index(&items, "fluorescent-h"), Some(4));
        assert_eq!(find_menu_index(&items, "tungsten"), Some(2));
        assert_eq!(find_menu_index(&items, "sunset"), None);
    }

    #[test]
    fn test_capture_error_classification() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "poll timeout");
        assert!(capture_error("/dev/video0", timeout).is_transient());

        let gone = io::Error::from_raw_os_error(ENODEV);
        assert!(matches!(
            capture_error("/dev/video0", gone),
            AppError::VideoDeviceLost { .. }
        ));

        let busy = io::Error::from_raw_os_error(EBUSY);
        assert!(matches!(
            open_error("/dev/video0", busy),
            AppError::DeviceBusy { .. }
        ));
    }
}
