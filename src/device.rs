// src/device.rs - HTTP collaborator for the printer box API
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::status::{DeviceState, DeviceStatus};

const STATUS_PATH: &str = "/d3dapi/info/status";
const PRINT_PATH: &str = "/d3dapi/printer/print";
const STOP_PATH: &str = "/d3dapi/printer/stop";
const USER_AGENT: &str = concat!("wifibox-host/", env!("CARGO_PKG_VERSION"));

/// Failures talking to the box. Every variant is transient by design: the
/// engine retries with backoff instead of aborting a print over a flaky
/// wireless link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The box answered, but the body was not the expected JSON shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Reply body of a POST against the box API.
#[derive(Debug, Clone, Deserialize)]
pub struct PostReply {
    #[serde(default)]
    pub status: String,
}

impl PostReply {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Wire shape of `GET /d3dapi/info/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusEnvelope {
    pub data: StatusData,
}

/// Temperatures are reported in degrees, line counts as absolute numbers.
/// Only `state` is mandatory; an idle box omits most of the rest.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub state: String,
    #[serde(default)]
    pub hotend: f64,
    #[serde(default)]
    pub hotend_target: f64,
    #[serde(default)]
    pub bed: f64,
    #[serde(default)]
    pub bed_target: f64,
    #[serde(default)]
    pub current_line: u64,
    #[serde(default)]
    pub total_lines: u64,
    #[serde(default)]
    pub buffered_lines: u64,
}

impl From<StatusData> for DeviceStatus {
    fn from(data: StatusData) -> Self {
        DeviceStatus {
            state: DeviceState::from_wire(&data.state),
            hotend: data.hotend,
            hotend_target: data.hotend_target,
            bed: data.bed,
            bed_target: data.bed_target,
            current_line: data.current_line,
            total_lines: data.total_lines,
            buffered_lines: data.buffered_lines,
        }
    }
}

/// The engine's view of the box. Both loops talk through this trait so tests
/// can substitute a scripted double for the real HTTP client.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Fetch the current status snapshot.
    async fn fetch_status(&self) -> Result<StatusEnvelope, TransportError>;

    /// Send one block of g-code. `first` marks the first block of a job,
    /// which makes the box start the print.
    async fn send_block(&self, gcode: &str, first: bool) -> Result<PostReply, TransportError>;

    /// Ask the box to stop the running print, handing it g-code to run after
    /// stopping (heaters off, home).
    async fn stop_print(&self, gcode: &str) -> Result<PostReply, TransportError>;
}

/// reqwest-backed client for the box's HTTP API.
pub struct HttpDeviceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDeviceClient {
    pub fn new(host: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}", host),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let body = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .text()
            .await?;
        serde_json::from_str(&body).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, TransportError> {
        let body = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .form(form)
            .send()
            .await?
            .text()
            .await?;
        serde_json::from_str(&body).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn fetch_status(&self) -> Result<StatusEnvelope, TransportError> {
        self.get_json(STATUS_PATH).await
    }

    async fn send_block(&self, gcode: &str, first: bool) -> Result<PostReply, TransportError> {
        let flag = if first { "true" } else { "false" };
        self.post_form(PRINT_PATH, &[("gcode", gcode), ("start", flag), ("first", flag)])
            .await
    }

    async fn stop_print(&self, gcode: &str) -> Result<PostReply, TransportError> {
        self.post_form(STOP_PATH, &[("gcode", gcode)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_reply_success_detection() {
        let ok: PostReply = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(ok.is_success());
        let fail: PostReply = serde_json::from_str(r#"{"status":"error"}"#).unwrap();
        assert!(!fail.is_success());
        let missing: PostReply = serde_json::from_str("{}").unwrap();
        assert!(!missing.is_success());
    }

    #[test]
    fn status_envelope_parses_the_full_shape() {
        let body = r#"{
            "data": {
                "state": "printing",
                "hotend": 203.5,
                "hotend_target": 210,
                "bed": 60.1,
                "bed_target": 60,
                "current_line": 50,
                "total_lines": 200,
                "buffered_lines": 1200
            }
        }"#;
        let envelope: StatusEnvelope = serde_json::from_str(body).unwrap();
        let status = DeviceStatus::from(envelope.data);
        assert_eq!(status.state, DeviceState::Printing);
        assert_eq!(status.hotend, 203.5);
        assert_eq!(status.hotend_target, 210.0);
        assert_eq!(status.current_line, 50);
        assert_eq!(status.buffered_lines, 1200);
    }

    #[test]
    fn idle_status_with_sparse_fields_still_parses() {
        let body = r#"{"data": {"state": "idle", "hotend": 24}}"#;
        let envelope: StatusEnvelope = serde_json::from_str(body).unwrap();
        let status = DeviceStatus::from(envelope.data);
        assert_eq!(status.state, DeviceState::Idle);
        assert_eq!(status.total_lines, 0);
    }

    #[test]
    fn missing_state_is_a_malformed_body() {
        let body = r#"{"data": {"hotend": 24}}"#;
        assert!(serde_json::from_str::<StatusEnvelope>(body).is_err());
    }
}
