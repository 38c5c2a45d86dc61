use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

/// A still image captured from the camera, JPEG encoded.
///
/// Frames are ephemeral: one is produced per capture and dropped once the
/// request that carries it has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg,
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    /// Base64 payload of the JPEG bytes, standard alphabet, no data-URI prefix.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.jpeg)
    }

    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }

    /// Short label for logs and the frozen-frame view.
    pub fn label(&self) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        format!(
            "#{seq:06} {w}x{h} @ {ts}",
            seq = self.seq,
            w = self.width,
            h = self.height,
            ts = dt.format("%H:%M:%S%.3f")
        )
    }
}

#[cfg(test)]
impl Frame {
    /// Returns true if the payload starts with a JPEG start-of-image marker.
    pub fn looks_like_jpeg(&self) -> bool {
        self.jpeg.starts_with(&[0xFF, 0xD8])
    }
}
