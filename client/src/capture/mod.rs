//! Camera acquisition and still-frame capture.
//!
//! A background reader keeps the most recent JPEG from the camera in a watch
//! channel (the "live view"). Captures take that image, draw it into an
//! offscreen buffer sized from the first frame and re-encode it as JPEG.

pub mod mjpeg;
pub mod polling;

use chrono::Utc;
use face_gate_common::config::{CameraConfig, CameraMode};
use face_gate_common::frame::Frame;
use futures_util::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageReader;
use reqwest::StatusCode;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The latest raw image received from the camera.
#[derive(Debug)]
pub struct LiveFrame {
    pub jpeg: Vec<u8>,
    pub received_at_ms: i64,
}

impl LiveFrame {
    pub fn now(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            received_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera denied access (HTTP {0}); check the camera credentials")]
    PermissionDenied(u16),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("no frame from camera within {0:?}")]
    NoFrame(Duration),
    #[error("camera is not streaming yet")]
    NotReady,
    #[error("failed to decode camera frame: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode captured frame: {0}")]
    Encode(image::ImageError),
    #[error("capture worker failed: {0}")]
    Worker(tokio::task::JoinError),
}

/// Map a camera HTTP status to a distinguishable acquisition error.
fn check_status(url: &str, status: StatusCode) -> Result<(), CameraError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(CameraError::PermissionDenied(status.as_u16()))
        }
        _ => Err(CameraError::Unavailable(format!(
            "camera at {url} answered HTTP {}",
            status.as_u16()
        ))),
    }
}

pub struct CaptureController {
    live: watch::Receiver<Option<Arc<LiveFrame>>>,
    width: u32,
    height: u32,
    quality: u8,
    seq: AtomicU64,
    reader: Option<JoinHandle<()>>,
}

impl CaptureController {
    /// Connect to the camera, start the live reader and wait for the first
    /// frame so the capture buffer can be sized from real dimensions.
    pub async fn acquire(config: &CameraConfig) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CameraError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        let (tx, rx) = watch::channel(None);

        info!(url = config.url, mode = ?config.mode, "acquiring camera");
        let reader = match config.mode {
            CameraMode::Mjpeg => {
                let response = mjpeg::connect(&client, &config.url).await?;
                tokio::spawn(mjpeg::run_reader(client, config.url.clone(), response, tx))
            }
            CameraMode::Polling => {
                let first = polling::fetch_frame(&client, &config.url).await?;
                tx.send_replace(Some(Arc::new(first)));
                tokio::spawn(polling::run_poller(
                    client,
                    config.url.clone(),
                    config.poll_interval(),
                    tx,
                ))
            }
        };

        let mut controller =
            Self::from_feed(rx, config.quality, config.metadata_timeout()).await.inspect_err(|_| {
                reader.abort();
            })?;
        controller.reader = Some(reader);
        Ok(controller)
    }

    /// Build a controller over an existing live feed, waiting up to `timeout`
    /// for its first frame.
    pub async fn from_feed(
        mut live: watch::Receiver<Option<Arc<LiveFrame>>>,
        quality: u8,
        timeout: Duration,
    ) -> Result<Self, CameraError> {
        let first = match tokio::time::timeout(timeout, live.wait_for(Option::is_some)).await {
            Ok(Ok(frame)) => frame.clone(),
            Ok(Err(_)) => {
                return Err(CameraError::Unavailable(
                    "camera stream ended before the first frame".into(),
                ))
            }
            Err(_) => return Err(CameraError::NoFrame(timeout)),
        };
        let Some(first) = first else {
            return Err(CameraError::NotReady);
        };

        let (width, height) = ImageReader::new(Cursor::new(&first.jpeg))
            .with_guessed_format()
            .map_err(|e| CameraError::Decode(e.into()))?
            .into_dimensions()
            .map_err(CameraError::Decode)?;
        info!(width, height, "camera ready");

        Ok(Self {
            live,
            width,
            height,
            quality: quality.clamp(1, 100),
            seq: AtomicU64::new(0),
            reader: None,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Snapshot the current live image as a JPEG frame.
    ///
    /// Decoding and re-encoding run on the blocking pool so the driver loop
    /// and the camera reader keep going meanwhile.
    pub async fn capture_frame(&self) -> Result<Frame, CameraError> {
        let live = self.live.borrow().clone().ok_or(CameraError::NotReady)?;
        let now_ms = Utc::now().timestamp_millis();
        debug!(age_ms = now_ms - live.received_at_ms, "capturing live frame");

        let (width, height, quality) = (self.width, self.height, self.quality);
        let jpeg = tokio::task::spawn_blocking(move || {
            reencode(&live.jpeg, width, height, quality)
        })
        .await
        .map_err(CameraError::Worker)??;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Ok(Frame::new(jpeg, width, height, now_ms, seq))
    }

    /// A lazy sequence of `count` captures spaced `interval` apart.
    ///
    /// Each call starts a fresh sequence. The delay only sits between
    /// captures, so `count == 1` returns immediately.
    pub fn capture_frames(
        &self,
        count: usize,
        interval: Duration,
    ) -> impl Stream<Item = Result<Frame, CameraError>> + '_ {
        futures_util::stream::unfold(0usize, move |taken| async move {
            if taken >= count {
                return None;
            }
            if taken > 0 {
                tokio::time::sleep(interval).await;
            }
            Some((self.capture_frame().await, taken + 1))
        })
    }
}

/// Draw `jpeg` into a `width`x`height` buffer and encode it again.
fn reencode(jpeg: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, CameraError> {
    let image = image::load_from_memory(jpeg).map_err(CameraError::Decode)?;
    let image = if image.width() != width || image.height() != height {
        debug!(
            from = ?(image.width(), image.height()),
            to = ?(width, height),
            "live frame size changed, rescaling into capture buffer"
        );
        image.resize_exact(width, height, FilterType::Triangle)
    } else {
        image
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&image.to_rgb8())
        .map_err(CameraError::Encode)?;
    Ok(out)
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::StreamExt;
    use image::{Rgb, RgbImage};

    /// Encode a solid-colour JPEG of the given size.
    pub(crate) fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&img)
            .unwrap();
        out
    }

    /// A controller over an in-memory feed already holding one frame.
    pub(crate) async fn test_controller(
        width: u32,
        height: u32,
    ) -> (CaptureController, watch::Sender<Option<Arc<LiveFrame>>>) {
        let (tx, rx) = watch::channel(Some(Arc::new(LiveFrame::now(jpeg_fixture(width, height)))));
        let controller = CaptureController::from_feed(rx, 80, Duration::from_secs(1))
            .await
            .unwrap();
        (controller, tx)
    }

    #[tokio::test]
    async fn sizes_buffer_from_first_frame() {
        let (controller, _tx) = test_controller(64, 48).await;
        assert_eq!(controller.dimensions(), (64, 48));

        let frame = controller.capture_frame().await.unwrap();
        assert!(frame.jpeg.starts_with(&[0xFF, 0xD8]));
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.seq, 0);
        assert_eq!(controller.capture_frame().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn rescales_when_live_size_changes() {
        let (controller, tx) = test_controller(32, 32).await;
        tx.send_replace(Some(Arc::new(LiveFrame::now(jpeg_fixture(16, 8)))));
        let frame = controller.capture_frame().await.unwrap();
        let decoded = image::load_from_memory(&frame.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[tokio::test]
    async fn capture_leaves_runtime_thread_free() {
        let (controller, _tx) = test_controller(640, 480).await;
        let ticker = tokio::spawn(async {});
        let frame = controller.capture_frame().await.unwrap();
        assert!(ticker.is_finished());
        assert_eq!((frame.width, frame.height), (640, 480));
    }

    #[test]
    fn reencode_rejects_garbage() {
        assert!(matches!(
            reencode(b"not a jpeg", 8, 8, 80),
            Err(CameraError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn waits_for_metadata_before_ready() {
        let (tx, rx) = watch::channel(None);
        let pending = tokio::spawn(CaptureController::from_feed(rx, 80, Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        tx.send_replace(Some(Arc::new(LiveFrame::now(jpeg_fixture(20, 10)))));
        let controller = pending.await.unwrap().unwrap();
        assert_eq!(controller.dimensions(), (20, 10));
    }

    #[tokio::test]
    async fn no_frame_times_out() {
        let (_tx, rx) = watch::channel(None);
        let result = CaptureController::from_feed(rx, 80, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CameraError::NoFrame(_))));
    }

    #[tokio::test]
    async fn closed_feed_is_unavailable() {
        let (tx, rx) = watch::channel(None);
        drop(tx);
        let result = CaptureController::from_feed(rx, 80, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CameraError::Unavailable(_))));
    }

    #[tokio::test]
    async fn undecodable_first_frame_is_rejected() {
        let (_tx, rx) = watch::channel(Some(Arc::new(LiveFrame::now(b"not a jpeg".to_vec()))));
        let result = CaptureController::from_feed(rx, 80, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CameraError::Decode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn single_frame_capture_has_no_delay() {
        let (controller, _tx) = test_controller(8, 8).await;
        let start = tokio::time::Instant::now();
        let frames: Vec<_> = controller
            .capture_frames(1, Duration::from_secs(10))
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn multi_frame_capture_spaces_frames() {
        let (controller, _tx) = test_controller(8, 8).await;
        let start = tokio::time::Instant::now();
        let frames: Vec<_> = controller
            .capture_frames(3, Duration::from_millis(200))
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert!(start.elapsed() >= Duration::from_millis(400));
        let seqs: Vec<u64> = frames.into_iter().map(|f| f.unwrap().seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        // A second call starts over with a fresh sequence of captures
        let again: Vec<_> = controller
            .capture_frames(2, Duration::from_millis(200))
            .collect()
            .await;
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn status_mapping() {
        assert!(check_status("cam", StatusCode::OK).is_ok());
        assert!(matches!(
            check_status("cam", StatusCode::FORBIDDEN),
            Err(CameraError::PermissionDenied(403))
        ));
        assert!(matches!(
            check_status("cam", StatusCode::NOT_FOUND),
            Err(CameraError::Unavailable(_))
        ));
    }
}
