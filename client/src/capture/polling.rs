use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{check_status, CameraError, LiveFrame};

/// Fetch one JPEG from a single-frame camera endpoint.
pub async fn fetch_frame(client: &reqwest::Client, url: &str) -> Result<LiveFrame, CameraError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CameraError::Unavailable(format!("could not reach camera at {url}: {e}")))?;
    check_status(url, response.status())?;
    let jpeg = response
        .bytes()
        .await
        .map_err(|e| CameraError::Unavailable(format!("failed to read camera frame: {e}")))?;
    if jpeg.is_empty() {
        return Err(CameraError::Unavailable(format!("camera at {url} returned an empty frame")));
    }
    Ok(LiveFrame::now(jpeg.to_vec()))
}

/// Polling fallback for cameras without a stream: refresh the live frame
/// every `interval` until nobody is watching.
pub async fn run_poller(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    live: watch::Sender<Option<Arc<LiveFrame>>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; acquisition already fetched that frame.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if live.is_closed() {
            debug!(url, "no viewers left, stopping camera poller");
            return;
        }
        match fetch_frame(&client, &url).await {
            Ok(frame) => {
                debug!(bytes = frame.jpeg.len(), "polled live frame");
                live.send_replace(Some(Arc::new(frame)));
            }
            Err(e) => warn!(error = %e, url, "failed to fetch camera frame"),
        }
    }
}
