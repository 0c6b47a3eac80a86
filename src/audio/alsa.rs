//! ALSA implementation of the audio driver

use alsa::pcm::{Access, Format, Frames, HwParams, State};
use alsa::{Direction, ValueOr, PCM};
use tracing::{debug, info, warn};

use super::device::{AudioDeviceInfo, AudioDriver, AudioInputStream};
use crate::error::{AppError, Result};

/// Devices probed per card
const MAX_DEVICES_PER_CARD: i32 = 8;

const EIO: i32 = 5;
const ENODEV: i32 = 19;
const EBUSY: i32 = 16;
const EPIPE: i32 = 32;
const ESTRPIPE: i32 = 86;

/// Audio driver backed by ALSA hw devices plus the "default" PCM
#[derive(Debug, Default, Clone, Copy)]
pub struct AlsaDriver;

impl AlsaDriver {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDriver for AlsaDriver {
    fn enumerate_devices(&self) -> Result<Vec<AudioDeviceInfo>> {
        let mut devices = Vec::new();

        for card_result in alsa::card::Iter::new() {
            let card = match card_result {
                Ok(c) => c,
                Err(e) => {
                    debug!("Error iterating card: {}", e);
                    continue;
                }
            };

            let card_index = card.get_index();
            let card_name = card.get_name().unwrap_or_else(|_| "Unknown".to_string());
            let card_longname = card.get_longname().unwrap_or_else(|_| card_name.clone());
            debug!("Found audio card {}: {}", card_index, card_longname);

            for device_index in 0..MAX_DEVICES_PER_CARD {
                let name = format!("hw:{},{}", card_index, device_index);
                let Ok(pcm) = PCM::new(&name, Direction::Capture, false) else {
                    continue;
                };
                let (max_input_channels, default_sample_rate) = query_caps(&pcm);

                devices.push(AudioDeviceInfo {
                    index: devices.len(),
                    name,
                    description: format!("{} ({}) - Device {}", card_longname, card_name, device_index),
                    max_input_channels,
                    default_sample_rate,
                });
            }
        }

        // The plug layer last, so real hardware wins the first-input fallback
        if let Ok(pcm) = PCM::new("default", Direction::Capture, false) {
            let (max_input_channels, default_sample_rate) = query_caps(&pcm);
            devices.push(AudioDeviceInfo {
                index: devices.len(),
                name: "default".to_string(),
                description: "Default Audio Device".to_string(),
                max_input_channels,
                default_sample_rate,
            });
        }

        info!("Found {} audio capture devices", devices.len());
        Ok(devices)
    }

    fn check_settings(
        &self,
        device: &AudioDeviceInfo,
        sample_rate: u32,
        channels: u32,
        block_size: u32,
    ) -> Result<bool> {
        let pcm = match PCM::new(&device.name, Direction::Capture, false) {
            Ok(pcm) => pcm,
            Err(e) if e.errno() == EBUSY => {
                return Err(AppError::DeviceBusy {
                    device: device.name.clone(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                debug!("Cannot open {} for probing: {}", device.name, e);
                return Ok(false);
            }
        };

        match configure(&pcm, sample_rate, channels, block_size) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("{} rejected {} Hz: {}", device.name, sample_rate, e);
                Ok(false)
            }
        }
    }

    fn open_input_stream(
        &self,
        device: &AudioDeviceInfo,
        sample_rate: u32,
        channels: u32,
        block_size: u32,
    ) -> Result<Box<dyn AudioInputStream>> {
        let pcm = PCM::new(&device.name, Direction::Capture, false).map_err(|e| {
            if e.errno() == EBUSY {
                AppError::DeviceBusy {
                    device: device.name.clone(),
                    reason: e.to_string(),
                }
            } else {
                AppError::AudioError(format!(
                    "Failed to open audio device {}: {}",
                    device.name, e
                ))
            }
        })?;

        configure(&pcm, sample_rate, channels, block_size)?;

        pcm.prepare()
            .map_err(|e| AppError::AudioError(format!("Failed to prepare PCM: {}", e)))?;

        info!(
            "Audio capture configured on {}: {}Hz {}ch block {}",
            device.name, sample_rate, channels, block_size
        );

        Ok(Box::new(AlsaInputStream {
            pcm,
            device: device.name.clone(),
        }))
    }
}

/// Max channels and, for fixed-rate devices, the only rate they run at
fn query_caps(pcm: &PCM) -> (u32, Option<u32>) {
    let Ok(hwp) = HwParams::any(pcm) else {
        return (0, None);
    };

    let channels = hwp.get_channels_max().unwrap_or(0);
    let default_rate = match (hwp.get_rate_min(), hwp.get_rate_max()) {
        (Ok(min), Ok(max)) if min == max && min > 0 => Some(min),
        _ => None,
    };

    (channels, default_rate)
}

/// Apply S16 interleaved capture parameters with an exact rate
fn configure(pcm: &PCM, sample_rate: u32, channels: u32, block_size: u32) -> Result<()> {
    let hwp = HwParams::any(pcm)
        .map_err(|e| AppError::AudioError(format!("Failed to get HwParams: {}", e)))?;

    hwp.set_channels(channels)
        .map_err(|e| AppError::AudioError(format!("Failed to set channels: {}", e)))?;

    hwp.set_rate(sample_rate, ValueOr::Nearest)
        .map_err(|e| AppError::AudioError(format!("Failed to set sample rate: {}", e)))?;

    hwp.set_format(Format::s16())
        .map_err(|e| AppError::AudioError(format!("Failed to set format: {}", e)))?;

    hwp.set_access(Access::RWInterleaved)
        .map_err(|e| AppError::AudioError(format!("Failed to set access: {}", e)))?;

    hwp.set_period_size_near(block_size as Frames, ValueOr::Nearest)
        .map_err(|e| AppError::AudioError(format!("Failed to set period size: {}", e)))?;

    hwp.set_buffer_size_near((block_size * 4) as Frames)
        .map_err(|e| AppError::AudioError(format!("Failed to set buffer size: {}", e)))?;

    pcm.hw_params(&hwp)
        .map_err(|e| AppError::AudioError(format!("Failed to apply hw params: {}", e)))?;

    // Nearest lets ALSA pick a neighbour; only an exact match counts
    let actual = pcm
        .hw_params_current()
        .and_then(|h| h.get_rate())
        .map_err(|e| AppError::AudioError(format!("Failed to read back rate: {}", e)))?;
    if actual != sample_rate {
        return Err(AppError::AudioError(format!(
            "Device runs at {} Hz, not {} Hz",
            actual, sample_rate
        )));
    }

    Ok(())
}

/// Open ALSA capture stream; the PCM closes when dropped
struct AlsaInputStream {
    pcm: PCM,
    device: String,
}

impl AudioInputStream for AlsaInputStream {
    fn read(&mut self, buf: &mut [i16]) -> Result<()> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.pcm.state() {
                State::XRun => {
                    warn!("Audio buffer overrun on {}, recovering", self.device);
                    let _ = self.pcm.prepare();
                }
                State::Suspended => {
                    warn!("Audio device {} suspended, recovering", self.device);
                    let _ = self.pcm.resume();
                }
                State::Disconnected => {
                    return Err(AppError::AudioError(format!(
                        "Audio device {} disconnected",
                        self.device
                    )));
                }
                _ => {}
            }

            // io_i16 borrows the PCM, so take it per read
            let io = self
                .pcm
                .io_i16()
                .map_err(|e| AppError::AudioError(format!("Failed to get PCM IO: {}", e)))?;

            match io.readi(&mut buf[filled..]) {
                Ok(frames) => filled += frames,
                Err(e) => match e.errno() {
                    EPIPE | ESTRPIPE => {
                        warn!("Audio buffer overrun on {}", self.device);
                        let _ = self.pcm.prepare();
                    }
                    EIO | ENODEV => {
                        return Err(AppError::AudioError(format!(
                            "Audio device {} lost: {}",
                            self.device, e
                        )));
                    }
                    _ => {
                        return Err(AppError::AudioError(format!(
                            "Audio read error on {}: {}",
                            self.device, e
                        )));
                    }
                },
            }
        }

        Ok(())
    }
}
