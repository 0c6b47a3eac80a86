//! Audio device enumeration and capture device/rate selection

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Device name keywords associated with voice/communication capture hardware,
/// in priority order
pub const PREFERRED_DEVICE_KEYWORDS: [&str; 5] = ["voice", "google", "sndrpigoogle", "mic", "hifi"];

/// Rates probed after the explicit override and the device default
pub const FALLBACK_SAMPLE_RATES: [u32; 5] = [48000, 44100, 32000, 16000, 8000];

/// Capture is always single channel
pub const CAPTURE_CHANNELS: u32 = 1;

/// Audio device information
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    /// Position in the driver's enumeration (what `PI_AUDIO_DEV` refers to)
    pub index: usize,
    /// Driver-level device name (e.g., "hw:1,0" or "default")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Maximum number of capture channels (0 = not an input device)
    pub max_input_channels: u32,
    /// Rate the device reports as its default, if any
    pub default_sample_rate: Option<u32>,
}

impl AudioDeviceInfo {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    fn matches_keyword(&self) -> bool {
        let name = format!("{} {}", self.name, self.description).to_lowercase();
        PREFERRED_DEVICE_KEYWORDS.iter().any(|k| name.contains(k))
    }
}

/// Blocking PCM input stream, released on drop
pub trait AudioInputStream: Send {
    /// Fill `buf` completely with mono S16 samples, blocking until done
    fn read(&mut self, buf: &mut [i16]) -> Result<()>;
}

/// Audio hardware abstraction
pub trait AudioDriver: Send + Sync {
    /// List every device the driver knows about
    fn enumerate_devices(&self) -> Result<Vec<AudioDeviceInfo>>;

    /// Whether the device accepts these capture settings. A device held by
    /// another process is `DeviceBusy`, not a rejection.
    fn check_settings(
        &self,
        device: &AudioDeviceInfo,
        sample_rate: u32,
        channels: u32,
        block_size: u32,
    ) -> Result<bool>;

    /// Open and start a capture stream
    fn open_input_stream(
        &self,
        device: &AudioDeviceInfo,
        sample_rate: u32,
        channels: u32,
        block_size: u32,
    ) -> Result<Box<dyn AudioInputStream>>;
}

/// Verified capture settings for one producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDeviceProfile {
    pub device: AudioDeviceInfo,
    pub sample_rate: u32,
    pub channels: u32,
    pub block_size: u32,
}

/// Picks a capture device and a sample rate it actually accepts
pub struct DeviceSelector {
    driver: Arc<dyn AudioDriver>,
    device_index: Option<usize>,
    sample_rate: Option<u32>,
    block_size: u32,
}

impl DeviceSelector {
    pub fn new(driver: Arc<dyn AudioDriver>, block_size: u32) -> Self {
        Self {
            driver,
            device_index: None,
            sample_rate: None,
            block_size,
        }
    }

    /// Use this device index as-is instead of searching
    pub fn with_device_index(mut self, index: Option<usize>) -> Self {
        self.device_index = index;
        self
    }

    /// Try this rate before anything else
    pub fn with_sample_rate(mut self, rate: Option<u32>) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Choose a device and verify a sample rate for single-channel capture
    pub fn select(&self) -> Result<AudioDeviceProfile> {
        let devices = self.driver.enumerate_devices()?;
        debug!("Enumerated {} audio devices", devices.len());

        let device = match self.device_index {
            Some(index) => devices
                .into_iter()
                .find(|d| d.index == index)
                .ok_or_else(|| {
                    AppError::NoInputDevice(format!("configured device index {} not found", index))
                })?,
            None => pick_input_device(devices)?,
        };

        let candidates = rate_candidates(self.sample_rate, device.default_sample_rate);
        for &rate in &candidates {
            if self
                .driver
                .check_settings(&device, rate, CAPTURE_CHANNELS, self.block_size)?
            {
                info!(
                    "Selected audio device {} ({}) @ {} Hz, block {}",
                    device.index, device.description, rate, self.block_size
                );
                return Ok(AudioDeviceProfile {
                    device,
                    sample_rate: rate,
                    channels: CAPTURE_CHANNELS,
                    block_size: self.block_size,
                });
            }
            debug!("Audio device {} rejected {} Hz", device.name, rate);
        }

        warn!(
            "Audio device {} accepted none of {:?}",
            device.name, candidates
        );
        Err(AppError::UnsupportedRate {
            device: device.name,
            tried: candidates,
        })
    }
}

/// First input device whose name carries a preferred keyword, else the first
/// input device
fn pick_input_device(devices: Vec<AudioDeviceInfo>) -> Result<AudioDeviceInfo> {
    let mut fallback = None;
    for device in devices.into_iter().filter(AudioDeviceInfo::is_input) {
        if device.matches_keyword() {
            return Ok(device);
        }
        if fallback.is_none() {
            fallback = Some(device);
        }
    }

    fallback.ok_or_else(|| AppError::NoInputDevice("no input-capable device".to_string()))
}

/// Probe order: override, device default, then the fixed ladder
fn rate_candidates(explicit: Option<u32>, device_default: Option<u32>) -> Vec<u32> {
    let mut candidates = Vec::with_capacity(FALLBACK_SAMPLE_RATES.len() + 2);
    let leading = explicit.into_iter().chain(device_default);
    for rate in leading.chain(FALLBACK_SAMPLE_RATES) {
        if rate > 0 && !candidates.contains(&rate) {
            candidates.push(rate);
        }
    }
    candidates
}
