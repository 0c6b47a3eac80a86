//! picam-rtc - Raspberry Pi camera and microphone over WebRTC
//!
//! Each browser that posts an SDP offer gets its own session with a paced
//! camera track (H.264) and a microphone track (Opus).

pub mod audio;
pub mod config;
pub mod error;
pub mod media;
pub mod state;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
