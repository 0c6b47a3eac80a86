//! Microphone track producer
//!
//! ALSA reads block for up to one block's real-time duration, so each producer
//! owns one blocking worker that reads `block_size` samples at a time and hands
//! them to `next_frame` over a small bounded channel. `close` abandons any
//! pending `next_frame`, stops the worker and waits for it to drop the stream.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::device::{AudioDeviceProfile, AudioDriver, AudioInputStream};
use super::gain::Gain;
use crate::error::{AppError, Result};
use crate::media::{FrameFormat, MediaFrame, Timebase, TrackKind, TrackProducer};

/// Blocks buffered between the worker and the consumer
const HANDOFF_CAPACITY: usize = 4;

type Block = Result<Vec<i16>>;

struct Reader {
    rx: mpsc::Receiver<Block>,
    pts: u64,
}

/// Audio track fed by a capture worker
pub struct AudioTrackProducer {
    profile: AudioDeviceProfile,
    gain: Gain,
    timebase: Timebase,
    reader: Mutex<Reader>,
    cancel: CancellationToken,
    stop_flag: Arc<AtomicBool>,
    finished: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AudioTrackProducer {
    /// Open the profile's device and start the capture worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        driver: Arc<dyn AudioDriver>,
        profile: AudioDeviceProfile,
        gain_db: f64,
    ) -> Result<Self> {
        let stream = driver.open_input_stream(
            &profile.device,
            profile.sample_rate,
            profile.channels,
            profile.block_size,
        )?;

        let gain = Gain::from_db(gain_db);
        info!(
            "[Audio] Using device idx {} ({}) @ {} Hz, block {}, gain {:+.1} dB",
            profile.device.index,
            profile.device.name,
            profile.sample_rate,
            profile.block_size,
            gain.db()
        );

        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker = {
            let stop_flag = stop_flag.clone();
            let block_size = profile.block_size as usize;
            let device = profile.device.name.clone();
            tokio::task::spawn_blocking(move || {
                read_loop(stream, block_size, gain, tx, stop_flag);
                debug!("Audio capture worker for {} exited", device);
            })
        };

        Ok(Self {
            timebase: Timebase::per(profile.sample_rate),
            profile,
            gain,
            reader: Mutex::new(Reader { rx, pts: 0 }),
            cancel: CancellationToken::new(),
            stop_flag,
            finished: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn profile(&self) -> &AudioDeviceProfile {
        &self.profile
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    fn closed_error() -> AppError {
        AppError::ProducerClosed("audio")
    }

    fn frame_from_block(&self, samples: &[i16], pts: u64) -> MediaFrame {
        let mut payload = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }

        MediaFrame {
            payload: Bytes::from(payload),
            pts,
            timebase: self.timebase,
            format: FrameFormat::Audio {
                sample_rate: self.profile.sample_rate,
                channels: self.profile.channels,
                samples: samples.len() as u32,
            },
        }
    }
}

#[async_trait]
impl TrackProducer for AudioTrackProducer {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn timebase(&self) -> Timebase {
        self.timebase
    }

    async fn next_frame(&self) -> Result<MediaFrame> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }

        let mut reader = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Self::closed_error()),
            reader = self.reader.lock() => reader,
        };

        let block = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Self::closed_error()),
            block = reader.rx.recv() => block,
        };

        match block {
            Some(Ok(samples)) => {
                let frame = self.frame_from_block(&samples, reader.pts);
                reader.pts += samples.len() as u64;
                Ok(frame)
            }
            Some(Err(e)) => {
                self.finished.store(true, Ordering::SeqCst);
                Err(e)
            }
            None => {
                self.finished.store(true, Ordering::SeqCst);
                Err(Self::closed_error())
            }
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.stop_flag.store(true, Ordering::SeqCst);

        // Unblocks a worker parked on a full channel
        self.reader.lock().await.rx.close();

        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Audio capture worker panicked: {}", e);
            }
            info!("Audio capture on {} closed", self.profile.device.name);
        }
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.finished.load(Ordering::SeqCst)
    }
}

impl Drop for AudioTrackProducer {
    fn drop(&mut self) {
        // Dropping the receiver lets the worker exit after its current block
        self.cancel.cancel();
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

/// Worker body: read, apply gain, hand off; the stream drops on exit
fn read_loop(
    mut stream: Box<dyn AudioInputStream>,
    block_size: usize,
    gain: Gain,
    tx: mpsc::Sender<Block>,
    stop_flag: Arc<AtomicBool>,
) {
    while !stop_flag.load(Ordering::Relaxed) {
        let mut block = vec![0i16; block_size];
        match stream.read(&mut block) {
            Ok(()) => {
                gain.apply(&mut block);
                if tx.blocking_send(Ok(block)).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Audio capture error: {}", e);
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
}
