use bytes::BytesMut;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{check_status, CameraError, LiveFrame};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Largest part the parser buffers before giving up on it.
const MAX_PART_BYTES: usize = 8 * 1024 * 1024;

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental parser for a `multipart/x-mixed-replace` MJPEG body.
///
/// Chunks can split boundaries, headers and images anywhere; complete JPEGs
/// are returned as soon as the boundary that terminates them has arrived.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    /// Offset in `buffer` from which to resume scanning for the next boundary.
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one chunk and return every JPEG it completed, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Don't re-scan bytes already known to hold no boundary
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before the boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    if !jpeg.is_empty() {
                        frames.push(jpeg);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        if self.buffer.len() > MAX_PART_BYTES {
            warn!(
                bytes = self.buffer.len(),
                state = ?self.state,
                "MJPEG part exceeds size limit, resyncing on next boundary"
            );
            self.buffer.clear();
            self.jpeg_start = 0;
            self.state = ParseState::SeekingBoundary;
        }

        frames
    }
}

/// Open the MJPEG stream and check that the camera let us in.
pub async fn connect(
    client: &reqwest::Client,
    url: &str,
) -> Result<reqwest::Response, CameraError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CameraError::Unavailable(format!("could not reach camera at {url}: {e}")))?;
    check_status(url, response.status())?;
    info!(url, status = %response.status(), "connected to MJPEG stream");
    Ok(response)
}

/// Publish frames from `response` into `live`, reconnecting with exponential
/// backoff whenever the stream drops. Returns once nobody is watching.
pub async fn run_reader(
    client: reqwest::Client,
    url: String,
    response: reqwest::Response,
    live: watch::Sender<Option<Arc<LiveFrame>>>,
) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);
    let mut response = Some(response);

    loop {
        let result = match response.take() {
            Some(r) => Ok(r),
            None => connect(&client, &url).await,
        };
        match result {
            Ok(r) => match consume_stream(r, &live).await {
                Ok(()) => {
                    info!(url, "camera stream ended, reconnecting");
                    backoff = Duration::from_secs(2);
                }
                Err(e) => error!(error = %e, url, "camera stream error, reconnecting in {:?}", backoff),
            },
            Err(e) => error!(error = %e, url, "camera reconnect failed, retrying in {:?}", backoff),
        }
        if live.is_closed() {
            debug!(url, "no viewers left, stopping camera reader");
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    response: reqwest::Response,
    live: &watch::Sender<Option<Arc<LiveFrame>>>,
) -> Result<(), CameraError> {
    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| CameraError::Unavailable(format!("stream error: {e}")))?;
        for jpeg in parser.push(&chunk) {
            let frame = LiveFrame::now(jpeg);
            debug!(bytes = frame.jpeg.len(), "live frame");
            live.send_replace(Some(Arc::new(frame)));
        }
        if live.is_closed() {
            return Ok(());
        }
    }

    Ok(())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
