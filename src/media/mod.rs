//! Media frame types and the producer contract
//!
//! A track producer is a suspension point: `next_frame` may wait (for pacing,
//! for a blocking device read handed over from a worker thread) and `close`
//! must be able to abandon such a wait.

pub mod frame;

use async_trait::async_trait;

pub use frame::{FrameFormat, MediaFrame, Timebase, TrackKind};

use crate::error::Result;

/// Source of timestamped frames for one track
#[async_trait]
pub trait TrackProducer: Send + Sync {
    /// Track kind
    fn kind(&self) -> TrackKind;

    /// Timebase used by every frame this producer emits
    fn timebase(&self) -> Timebase;

    /// Produce the next frame, failing with `ProducerClosed` once closed
    async fn next_frame(&self) -> Result<MediaFrame>;

    /// Stop producing and release the underlying device. Idempotent.
    async fn close(&self);

    /// Whether `close` has been called or the device went away
    fn is_closed(&self) -> bool;
}
