//! Wire types for the recognition service.
//!
//! Requests are strict; responses are read as loose JSON values because the
//! service omits fields to signal outcomes (a verify body without `name` is a
//! no-match) and its error `detail` is not always a string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::Frame;

pub const VERIFY_PATH: &str = "verify";
pub const REGISTER_PATH: &str = "register";

/// `POST /verify` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub frames: Vec<String>,
}

impl VerifyRequest {
    pub fn from_frames(frames: &[Frame]) -> Self {
        Self {
            frames: frames.iter().map(Frame::to_base64).collect(),
        }
    }
}

/// `POST /register` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub image: String,
}

impl RegisterRequest {
    pub fn new(name: &str, frame: &Frame) -> Self {
        Self {
            name: name.to_string(),
            image: frame.to_base64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResult {
    Match { name: String, match_percentage: f64 },
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("response for {name} is missing a numeric match_percentage")]
    MissingPercentage { name: String },
}

impl VerifyResult {
    /// Interpret a successful `/verify` body.
    ///
    /// A missing, null or empty `name` means the service saw no match. A name
    /// without a numeric `match_percentage` is a malformed match.
    pub fn from_body(body: &Value) -> Result<Self, ShapeError> {
        let name = match body.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Ok(VerifyResult::NoMatch),
        };
        match body.get("match_percentage").and_then(Value::as_f64) {
            Some(match_percentage) => Ok(VerifyResult::Match {
                name,
                match_percentage,
            }),
            None => Err(ShapeError::MissingPercentage { name }),
        }
    }
}

/// Message of a successful `/register` body, if present.
pub fn register_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The `detail` of an error body, rendered as text.
///
/// Validation failures from the service carry a structured `detail` (a list
/// of field errors); those are rendered as compact JSON.
pub fn error_detail(body: &Value) -> Option<String> {
    match body.get("detail")? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
