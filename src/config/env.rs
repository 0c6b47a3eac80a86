//! Environment overrides
//!
//! Every variable is optional; unset or empty values keep the defaults.

use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use super::schema::{AppConfig, TurnServer, DEFAULT_BLOCK_SIZE};
use crate::error::{AppError, Result};

impl AppConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = AppConfig::default();

        if let Some(v) = get("PI_W") {
            config.video.width = parse_positive("PI_W", &v)?;
        }
        if let Some(v) = get("PI_H") {
            config.video.height = parse_positive("PI_H", &v)?;
        }
        if let Some(v) = get("PI_FPS") {
            config.video.fps = parse_positive("PI_FPS", &v)?;
        }
        config.video.awb_mode = get("PI_AWB");
        if let Some(v) = get("PI_CAMERA_DEV") {
            config.video.device = PathBuf::from(v);
        }

        if let Some(v) = get("PI_AUDIO_DEV") {
            config.audio.device_index = Some(parse("PI_AUDIO_DEV", &v)?);
        }
        if let Some(v) = get("PI_AUDIO_SR") {
            match v.parse::<u32>() {
                Ok(rate) if rate > 0 => config.audio.sample_rate = Some(rate),
                _ => warn!("Ignoring invalid PI_AUDIO_SR value '{}'", v),
            }
        }
        if let Some(v) = get("PI_AUDIO_BLKSZ") {
            let block: i64 = parse("PI_AUDIO_BLKSZ", &v)?;
            config.audio.block_size = if block <= 0 {
                DEFAULT_BLOCK_SIZE
            } else {
                u32::try_from(block).map_err(|_| {
                    AppError::Config(format!("PI_AUDIO_BLKSZ out of range: {}", block))
                })?
            };
        }
        if let Some(v) = get("PI_AUDIO_GAIN_DB") {
            let gain: f64 = parse("PI_AUDIO_GAIN_DB", &v)?;
            if !gain.is_finite() {
                return Err(AppError::Config(format!(
                    "PI_AUDIO_GAIN_DB must be finite, got '{}'",
                    v
                )));
            }
            config.audio.gain_db = gain;
        }

        // Present but empty disables STUN entirely
        if let Some(v) = lookup("PI_STUN") {
            config.stream.stun_servers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(url) = get("PI_TURN") {
            config.stream.turn_servers = vec![TurnServer::new(
                url,
                get("PI_TURN_USER").unwrap_or_default(),
                get("PI_TURN_PASS").unwrap_or_default(),
            )];
        }

        if let Some(v) = get("PI_MAX_SESSIONS") {
            config.session.max_sessions = parse("PI_MAX_SESSIONS", &v)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

fn parse_positive(key: &str, value: &str) -> Result<u32> {
    match parse::<u32>(key, value)? {
        0 => Err(AppError::Config(format!("{} must be positive", key))),
        n => Ok(n),
    }
}
