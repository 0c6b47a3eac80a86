//! Audio capture and encoding
//!
//! - device selection over a pluggable [`AudioDriver`] (ALSA in production)
//! - per-session capture producer with saturating gain
//! - Opus encoding for WebRTC

pub mod alsa;
pub mod capture;
pub mod device;
pub mod encoder;
pub mod gain;

pub use self::alsa::AlsaDriver;
pub use capture::AudioTrackProducer;
pub use device::{
    AudioDeviceInfo, AudioDeviceProfile, AudioDriver, AudioInputStream, DeviceSelector,
};
pub use encoder::{AudioSampleEncoder, OpusConfig, OpusEncoder, OpusFrame};
pub use gain::Gain;
