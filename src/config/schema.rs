use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use crate::webrtc::config::{TurnServer, WebRtcConfig};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Camera settings and per-request defaults
    pub video: VideoConfig,
    /// Microphone settings
    pub audio: AudioConfig,
    /// ICE servers and encoder settings
    pub stream: WebRtcConfig,
    /// Session limits
    pub session: SessionConfig,
}

/// Web server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// Video capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// V4L2 capture node
    pub device: PathBuf,
    /// Width used when the offer does not ask for one
    pub width: u32,
    /// Height used when the offer does not ask for one
    pub height: u32,
    /// Frame rate used when the offer does not ask for one
    pub fps: u32,
    /// Auto-white-balance mode applied after the camera starts
    pub awb_mode: Option<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 640,
            height: 480,
            fps: 20,
            awb_mode: None,
        }
    }
}

/// Audio capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Explicit device index, skips keyword search
    pub device_index: Option<usize>,
    /// Rate probed before the device default and the fallback ladder
    pub sample_rate: Option<u32>,
    /// Samples per capture block
    pub block_size: u32,
    /// Gain in dB applied to every sample
    pub gain_db: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            sample_rate: None,
            block_size: DEFAULT_BLOCK_SIZE,
            gain_db: 0.0,
        }
    }
}

/// 20 ms at 48 kHz
pub const DEFAULT_BLOCK_SIZE: u32 = 960;

/// Session configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.web.http_port, 8080);
        assert_eq!(config.web.bind_address, "0.0.0.0");
        assert_eq!(
            (config.video.width, config.video.height, config.video.fps),
            (640, 480, 20)
        );
        assert_eq!(config.audio.block_size, 960);
        assert_eq!(config.session.max_sessions, 0);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"video":{"fps":15},"session":{"max_sessions":2}}"#).unwrap();
        assert_eq!(config.video.fps, 15);
        assert_eq!(config.video.width, 640);
        assert_eq!(config.session.max_sessions, 2);
        assert_eq!(config.stream, WebRtcConfig::default());
    }
}
