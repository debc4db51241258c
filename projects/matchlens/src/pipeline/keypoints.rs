use crate::error::InferenceError;
use crate::pipeline::types::Frame;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use opencv::core::Vector;
use opencv::imgcodecs;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A pitch landmark in image space, indexed like the pitch model vertices.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// Keypoint detection backend: one keypoint list per input frame, in order.
pub trait KeypointService: Send {
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Keypoint>>, InferenceError>;
}

#[derive(Serialize)]
struct KeypointRequest {
    images: Vec<String>,
}

#[derive(Deserialize)]
struct KeypointResponse {
    results: Vec<FrameKeypoints>,
}

#[derive(Deserialize)]
struct FrameKeypoints {
    keypoints: Vec<Keypoint>,
}

/// Client for a remote keypoint model served over HTTP.
///
/// Frames are JPEG-encoded and posted as base64 to `{base_url}/keypoints`.
pub struct HttpKeypointClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpKeypointClient {
    /// Must be called off the async runtime (blocking client).
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/keypoints", base_url.trim_end_matches('/')),
        })
    }

    fn encode(frame: &Frame) -> Result<String, InferenceError> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode_def(".jpg", &frame.mat, &mut buf)
            .map_err(|e| InferenceError::Backend(format!("jpeg encode: {}", e)))?;
        Ok(STANDARD.encode(buf.as_slice()))
    }
}

impl KeypointService for HttpKeypointClient {
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Keypoint>>, InferenceError> {
        let images = frames
            .iter()
            .map(Self::encode)
            .collect::<Result<Vec<_>, _>>()?;

        let response = self
            .client
            .post(&self.endpoint)
            .json(&KeypointRequest { images })
            .send()
            .map_err(|e| InferenceError::Backend(format!("keypoint request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let parsed: KeypointResponse = response
            .json()
            .map_err(|e| InferenceError::Backend(format!("keypoint response: {}", e)))?;
        Ok(parsed.results.into_iter().map(|r| r.keypoints).collect())
    }
}

fn classify_failure(status: StatusCode, body: String) -> InferenceError {
    match status {
        StatusCode::INSUFFICIENT_STORAGE | StatusCode::SERVICE_UNAVAILABLE => {
            InferenceError::ResourceExhausted(format!("{}: {}", status, body))
        }
        _ => InferenceError::from_message(format!("{}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(classify_failure(StatusCode::INSUFFICIENT_STORAGE, String::new())
            .is_resource_exhausted());
        assert!(classify_failure(StatusCode::SERVICE_UNAVAILABLE, String::new())
            .is_resource_exhausted());
        assert!(classify_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CUDA out of memory".to_string()
        )
        .is_resource_exhausted());
        assert!(
            !classify_failure(StatusCode::BAD_REQUEST, "bad image".to_string())
                .is_resource_exhausted()
        );
    }

    #[test]
    fn test_response_shape() {
        let body = r#"{"results":[{"keypoints":[{"x":1.0,"y":2.0,"confidence":0.9}]},{"keypoints":[]}]}"#;
        let parsed: KeypointResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].keypoints[0].confidence, 0.9);
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let client = HttpKeypointClient::new("http://localhost:8001/").unwrap();
        assert_eq!(client.endpoint, "http://localhost:8001/keypoints");
    }
}
