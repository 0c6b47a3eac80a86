//! Camera track producer
//!
//! Frames are pulled on demand and rate-limited to the configured fps: each
//! `next_frame` sleeps off whatever is left of the interval since the previous
//! pacing point, then captures on the blocking pool. The pacing point is taken
//! when the sleep ends, so capture latency overlaps the interval instead of
//! adding to it. There is no frame dropping and no catch-up after a slow capture.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::device::{CameraDriver, CameraHandle, CameraSettings};
use crate::error::{AppError, Result};
use crate::media::{FrameFormat, MediaFrame, Timebase, TrackKind, TrackProducer};

type SharedCamera = Arc<parking_lot::Mutex<Option<Box<dyn CameraHandle>>>>;

#[derive(Debug)]
struct Pacing {
    last_emit: Instant,
    pts: u64,
}

/// Video track fed by a camera
pub struct VideoTrackProducer {
    settings: CameraSettings,
    timebase: Timebase,
    interval: Duration,
    camera: SharedCamera,
    pacing: Mutex<Pacing>,
    cancel: CancellationToken,
    lost: AtomicBool,
}

impl VideoTrackProducer {
    /// Open and start the camera, then apply the white balance mode if any
    pub async fn open(driver: Arc<dyn CameraDriver>, settings: CameraSettings) -> Result<Self> {
        settings.validate()?;

        let open_settings = settings.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut handle = driver.open(&open_settings)?;
            if let Some(mode) = open_settings.awb_mode.as_deref() {
                if let Err(e) = handle.set_awb_mode(mode) {
                    warn!("Failed to apply white balance mode '{}': {}", mode, e);
                }
            }
            Ok::<_, AppError>(handle)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Camera open task failed: {}", e)))??;

        info!(
            "Video track opened on {} at {}x{} @ {} fps",
            settings.device_path.display(),
            settings.width,
            settings.height,
            settings.fps
        );

        Ok(Self {
            timebase: Timebase::per(settings.fps),
            interval: Duration::from_secs_f64(1.0 / settings.fps as f64),
            settings,
            camera: Arc::new(parking_lot::Mutex::new(Some(handle))),
            pacing: Mutex::new(Pacing {
                last_emit: Instant::now(),
                pts: 0,
            }),
            cancel: CancellationToken::new(),
            lost: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    fn closed_error() -> AppError {
        AppError::ProducerClosed("video")
    }
}

#[async_trait]
impl TrackProducer for VideoTrackProducer {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn timebase(&self) -> Timebase {
        self.timebase
    }

    async fn next_frame(&self) -> Result<MediaFrame> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }

        let mut pacing = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Self::closed_error()),
            pacing = self.pacing.lock() => pacing,
        };

        let elapsed = pacing.last_emit.elapsed();
        if elapsed < self.interval {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Self::closed_error()),
                _ = tokio::time::sleep(self.interval - elapsed) => {}
            }
        }
        pacing.last_emit = Instant::now();

        let camera = self.camera.clone();
        let capture = tokio::task::spawn_blocking(move || match camera.lock().as_mut() {
            Some(handle) => handle.capture_frame(),
            None => Err(AppError::ProducerClosed("video")),
        });

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Self::closed_error()),
            joined = capture => joined
                .map_err(|e| AppError::Internal(format!("Capture task failed: {}", e)))?,
        };

        let captured = match result {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                self.lost.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let frame = MediaFrame {
            payload: captured.data,
            pts: pacing.pts,
            timebase: self.timebase,
            format: FrameFormat::Video {
                resolution: captured.resolution,
                pixel_format: captured.pixel_format,
                stride: captured.stride,
            },
        };
        pacing.pts += 1;
        Ok(frame)
    }

    async fn close(&self) {
        self.cancel.cancel();

        // Waits out an in-flight capture, bounded by the capture timeout
        let camera = self.camera.clone();
        let released = tokio::task::spawn_blocking(move || camera.lock().take().is_some())
            .await
            .unwrap_or(false);

        if released {
            info!("Camera {} released", self.settings.device_path.display());
        } else {
            debug!("Video track already closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.lost.load(Ordering::SeqCst)
    }
}

impl Drop for VideoTrackProducer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
