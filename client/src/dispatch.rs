use face_gate_common::config::ServiceConfig;
use face_gate_common::frame::Frame;
use face_gate_common::protocol::{
    error_detail, register_message, RegisterRequest, ShapeError, VerifyRequest, VerifyResult,
    REGISTER_PATH, VERIFY_PATH,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Shown when the service accepts a registration without saying anything.
const DEFAULT_REGISTER_MESSAGE: &str = "Registration complete.";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid service configuration: {0}")]
    Setup(String),
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Request(reqwest::Error),
    /// Non-2xx answer. Displays as the service's own explanation.
    #[error("{detail}")]
    Status { status: u16, detail: String },
    #[error("malformed response: {0}")]
    MalformedBody(String),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DispatchError::Timeout
        } else {
            DispatchError::Request(e.without_url())
        }
    }
}

/// Trim a subject name and reject it if nothing is left.
pub fn validate_name(name: &str) -> Result<&str, DispatchError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DispatchError::Validation(
            "Please enter a name before registering.".into(),
        ));
    }
    Ok(name)
}

/// Sends verify and register requests to the recognition service.
pub struct Dispatcher {
    client: reqwest::Client,
    verify_url: String,
    register_url: String,
}

impl Dispatcher {
    pub fn new(config: &ServiceConfig) -> Result<Self, DispatchError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| DispatchError::Setup(format!("header {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| DispatchError::Setup(format!("header {key}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| DispatchError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            verify_url: config.endpoint(VERIFY_PATH),
            register_url: config.endpoint(REGISTER_PATH),
        })
    }

    pub async fn verify(&self, frames: &[Frame]) -> Result<VerifyResult, DispatchError> {
        let request = VerifyRequest::from_frames(frames);
        let body = self
            .submit(&self.verify_url, &request, |status| {
                format!("Server error: {}", status.as_u16())
            })
            .await?;
        let result = VerifyResult::from_body(&body)?;
        info!(matched = matches!(result, VerifyResult::Match { .. }), "verify answered");
        Ok(result)
    }

    /// Enroll `name` with one frame. An empty name fails locally without
    /// touching the network.
    pub async fn register(&self, name: &str, frame: &Frame) -> Result<String, DispatchError> {
        let name = validate_name(name)?;
        let request = RegisterRequest::new(name, frame);
        let body = self
            .submit(&self.register_url, &request, |_| "Registration failed.".to_string())
            .await?;
        let message = register_message(&body).unwrap_or_else(|| {
            warn!("register response carried no message");
            DEFAULT_REGISTER_MESSAGE.to_string()
        });
        info!(name, "registered");
        Ok(message)
    }

    /// POST `payload` as JSON and return the parsed body of a 2xx answer.
    ///
    /// Non-2xx answers become [`DispatchError::Status`] carrying the body's
    /// `detail`, or `fallback(status)` when there is none.
    async fn submit<P: Serialize>(
        &self,
        url: &str,
        payload: &P,
        fallback: impl FnOnce(StatusCode) -> String,
    ) -> Result<Value, DispatchError> {
        debug!(url, "submitting request");
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed = serde_json::from_str::<Value>(&text);

        if !status.is_success() {
            let detail = parsed
                .ok()
                .as_ref()
                .and_then(error_detail)
                .unwrap_or_else(|| fallback(status));
            warn!(url, status = status.as_u16(), detail, "service rejected request");
            return Err(DispatchError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        parsed.map_err(|e| DispatchError::MalformedBody(e.to_string()))
    }
}
