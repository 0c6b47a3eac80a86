//! WebRTC sessions for the camera and microphone
//!
//! Architecture:
//! ```text
//! Browser ---- POST /offer ----> SignalingEndpoint
//!                                      |
//!                                      v
//!                               SessionManager --- SessionRegistry
//!                                      |
//!                 +--------------------+--------------------+
//!                 v                    v                    v
//!        VideoTrackProducer    AudioTrackProducer     PeerSession
//!          (V4L2 camera)         (ALSA worker)      (webrtc-rs peer)
//!                 |                    |                    ^
//!                 +---- sender tasks: encode (H.264/Opus) --+
//! ```

pub mod config;
pub mod peer;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod track;
pub mod transport;

pub use config::{TurnServer, WebRtcConfig};
pub use peer::{PeerConnection, WebRtcTransport};
pub use registry::SessionRegistry;
pub use session::{Session, SessionManager, SessionState};
pub use signaling::{
    ConnectionState, OfferRequest, SdpAnswer, SignalingEndpoint, StreamParams,
};
pub use transport::{PeerSession, SdpType, SessionDescription, Transport};
