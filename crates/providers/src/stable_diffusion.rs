//! Image provider C: Stable Diffusion task API.
//!
//! Submission:   `POST {api_url}/v1/generation/text-to-image` -> `{"id": ".."}`
//! Status:       `GET  {api_url}/v1/generation/{id}`          -> [`SdTask`]
//! Notification: the same task object, signed with `X-Signature`.

use async_trait::async_trait;
use genforge_core::provider::ProviderKind;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{Notification, ProviderAdapter, ProviderError, RawNotification, RemoteStatus};
use crate::http;
use crate::params;
use crate::settings::ProviderSettings;

const MAX_PROMPT_CHARS: usize = 2000;
const SAMPLERS: &[&str] = &[
    "Euler a",
    "Euler",
    "DPM++ 2M Karras",
    "DPM++ SDE Karras",
    "DDIM",
    "UniPC",
];

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

/// Task object of the status endpoint and of pushes.
#[derive(Debug, Deserialize)]
pub struct SdTask {
    pub id: String,
    pub state: String,
    /// Fraction complete in `0.0..=1.0`.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub images: Vec<SdImage>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SdImage {
    pub url: String,
}

impl SdTask {
    pub fn remote_status(&self) -> RemoteStatus {
        match self.state.as_str() {
            "done" => RemoteStatus::Succeeded {
                assets: self.images.iter().map(|i| i.url.clone()).collect(),
            },
            "error" => RemoteStatus::Failed {
                reason: self
                    .error
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(http::truncate)
                    .unwrap_or_else(|| "Image generation failed".to_string()),
            },
            _ => RemoteStatus::in_progress(self.progress.map(|p| (p * 100.0).round() as i16)),
        }
    }
}

/// Adapter for image provider C.
pub struct StableDiffusionAdapter {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl StableDiffusionAdapter {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::build_client(&settings)?,
            settings,
        })
    }

    fn submit_body(&self, params: &Value) -> Result<Value, ProviderError> {
        self.validate(params)?;
        let map = params::object(params)?;
        let mut body = json!({
            "prompt": params::required_str(map, "prompt", MAX_PROMPT_CHARS)?,
            "negative_prompt": params::optional_str(map, "negative_prompt", MAX_PROMPT_CHARS)?.unwrap_or(""),
            "width": params::optional_int(map, "width", 64, 2048)?.unwrap_or(512),
            "height": params::optional_int(map, "height", 64, 2048)?.unwrap_or(512),
            "steps": params::optional_int(map, "steps", 1, 150)?.unwrap_or(30),
            "cfg_scale": params::optional_number(map, "cfg_scale", 1.0, 30.0)?.unwrap_or(7.0),
            "sampler": params::optional_choice(map, "sampler", SAMPLERS)?.unwrap_or("Euler a"),
            "seed": params::optional_int(map, "seed", -1, i64::from(u32::MAX))?.unwrap_or(-1),
            "batch_size": params::optional_int(map, "batch_size", 1, 4)?.unwrap_or(1),
        });
        if let Some(callback) = &self.settings.callback_url {
            body["webhook_url"] = json!(callback);
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for StableDiffusionAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ImageC
    }

    fn validate(&self, params: &Value) -> Result<(), ProviderError> {
        let map = params::object(params)?;
        params::required_str(map, "prompt", MAX_PROMPT_CHARS)?;
        params::optional_str(map, "negative_prompt", MAX_PROMPT_CHARS)?;
        for field in ["width", "height"] {
            if let Some(px) = params::optional_int(map, field, 64, 2048)? {
                if px % 8 != 0 {
                    return Err(ProviderError::InvalidParams(format!(
                        "{field} must be a multiple of 8"
                    )));
                }
            }
        }
        params::optional_int(map, "steps", 1, 150)?;
        params::optional_number(map, "cfg_scale", 1.0, 30.0)?;
        params::optional_choice(map, "sampler", SAMPLERS)?;
        params::optional_int(map, "seed", -1, i64::from(u32::MAX))?;
        params::optional_int(map, "batch_size", 1, 4)?;
        Ok(())
    }

    async fn submit(&self, params: &Value) -> Result<String, ProviderError> {
        let body = self.submit_body(params)?;
        let response = http::send(
            self.client
                .post(self.settings.url("/v1/generation/text-to-image"))
                .bearer_auth(&self.settings.api_key)
                .json(&body),
        )
        .await?;
        let ack: SubmitResponse = http::parse_response(response).await?;
        if ack.id.trim().is_empty() {
            return Err(ProviderError::Unavailable("empty task id in acknowledgment".into()));
        }
        Ok(ack.id)
    }

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, ProviderError> {
        let response = http::send(
            self.client
                .get(self.settings.url(&format!("/v1/generation/{remote_id}")))
                .bearer_auth(&self.settings.api_key),
        )
        .await?;
        let task: SdTask = http::parse_response(response).await?;
        Ok(task.remote_status())
    }

    fn parse_notification(&self, raw: &RawNotification) -> Result<Notification, ProviderError> {
        http::verify_signature(raw, &self.settings.webhook_secret)?;
        let task: SdTask = http::decode_body(raw)?;
        if task.id.trim().is_empty() {
            return Err(ProviderError::MalformedNotification("missing id".into()));
        }
        Ok(Notification {
            status: task.remote_status(),
            remote_id: task.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genforge_core::signature::compute_webhook_hmac;

    use super::*;

    fn adapter() -> StableDiffusionAdapter {
        StableDiffusionAdapter::new(ProviderSettings::new("http://sd.local", "key", "s3cret")).unwrap()
    }

    #[test]
    fn dimensions_must_align_to_eight() {
        let a = adapter();
        assert!(a.validate(&json!({"prompt": "lake", "width": 768, "height": 512})).is_ok());
        assert_matches!(
            a.validate(&json!({"prompt": "lake", "width": 770})),
            Err(ProviderError::InvalidParams(m)) if m == "width must be a multiple of 8"
        );
        assert_matches!(a.validate(&json!({"prompt": "lake", "height": 4096})), Err(_));
        assert_matches!(a.validate(&json!({"prompt": "lake", "sampler": "PLMS"})), Err(_));
    }

    #[test]
    fn submit_body_fills_defaults() {
        let body = adapter().submit_body(&json!({"prompt": "lake", "seed": 42})).unwrap();
        assert_eq!(body["width"], 512);
        assert_eq!(body["steps"], 30);
        assert_eq!(body["sampler"], "Euler a");
        assert_eq!(body["seed"], 42);
        assert_eq!(body["negative_prompt"], "");
        assert!(body.get("webhook_url").is_none());
    }

    #[test]
    fn fractional_progress_becomes_percent() {
        let task: SdTask =
            serde_json::from_value(json!({"id": "g1", "state": "running", "progress": 0.456})).unwrap();
        assert_eq!(task.remote_status(), RemoteStatus::InProgress { progress: Some(46) });

        let task: SdTask = serde_json::from_value(json!({"id": "g1", "state": "queued"})).unwrap();
        assert_eq!(task.remote_status(), RemoteStatus::InProgress { progress: None });
    }

    #[test]
    fn terminal_states() {
        let task: SdTask = serde_json::from_value(json!({
            "id": "g1", "state": "done",
            "images": [{"url": "https://sd/1.png"}, {"url": "https://sd/2.png"}]
        }))
        .unwrap();
        assert_eq!(
            task.remote_status(),
            RemoteStatus::Succeeded { assets: vec!["https://sd/1.png".into(), "https://sd/2.png".into()] }
        );

        let task: SdTask =
            serde_json::from_value(json!({"id": "g1", "state": "error", "error": "CUDA out of memory"}))
                .unwrap();
        assert_eq!(task.remote_status(), RemoteStatus::Failed { reason: "CUDA out of memory".into() });
    }

    #[test]
    fn notification_roundtrip() {
        let a = adapter();
        let body = br#"{"id":"g7","state":"error","error":"nsfw"}"#;
        let sig = format!("sha256={}", compute_webhook_hmac("s3cret", body));
        let n = a
            .parse_notification(&RawNotification::new(body.to_vec()).with_header("X-Signature", sig))
            .unwrap();
        assert_eq!(n.remote_id, "g7");
        assert_eq!(n.status, RemoteStatus::Failed { reason: "nsfw".into() });

        assert_matches!(
            a.parse_notification(&RawNotification::new(b"not json".to_vec()).with_header(
                "X-Signature",
                compute_webhook_hmac("s3cret", b"not json")
            )),
            Err(ProviderError::MalformedNotification(_))
        );
    }
}
