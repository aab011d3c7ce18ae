//! Image provider A: DALL·E-style asynchronous image relay.
//!
//! Submission:   `POST {api_url}/v1/images/generations/async` -> `{"task_id": ".."}`
//! Status:       `GET  {api_url}/v1/images/tasks/{task_id}`   -> [`DalleTask`]
//! Notification: the same task object, signed with `X-Signature`.

use async_trait::async_trait;
use genforge_core::provider::ProviderKind;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{Notification, ProviderAdapter, ProviderError, RawNotification, RemoteStatus};
use crate::http;
use crate::params;
use crate::settings::ProviderSettings;

const MAX_PROMPT_CHARS: usize = 4000;
const MODELS: &[&str] = &["dall-e-3", "dall-e-2"];
const SIZES: &[&str] = &["256x256", "512x512", "1024x1024", "1792x1024", "1024x1792"];
const QUALITIES: &[&str] = &["standard", "hd"];
const STYLES: &[&str] = &["vivid", "natural"];

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

/// Task object returned by the status endpoint and pushed on completion.
#[derive(Debug, Deserialize)]
pub struct DalleTask {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: Option<i16>,
    #[serde(default)]
    pub data: Vec<DalleImage>,
    #[serde(default)]
    pub error: Option<DalleError>,
}

#[derive(Debug, Deserialize)]
pub struct DalleImage {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DalleError {
    #[serde(default)]
    pub message: String,
}

impl DalleTask {
    /// Map the task's `status` onto a [`RemoteStatus`].
    pub fn remote_status(&self) -> RemoteStatus {
        match self.status.as_str() {
            "succeeded" => RemoteStatus::Succeeded {
                assets: self.data.iter().filter_map(|d| d.url.clone()).collect(),
            },
            "failed" | "cancelled" => RemoteStatus::Failed {
                reason: self
                    .error
                    .as_ref()
                    .map(|e| http::truncate(&e.message))
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Image generation failed".to_string()),
            },
            _ => RemoteStatus::in_progress(self.progress),
        }
    }
}

/// Adapter for image provider A.
pub struct DalleAdapter {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl DalleAdapter {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::build_client(&settings)?,
            settings,
        })
    }

    /// Build the submission body from validated params.
    fn submit_body(&self, params: &Value) -> Result<Value, ProviderError> {
        self.validate(params)?;
        let map = params::object(params)?;
        let model = params::optional_choice(map, "model", MODELS)?.unwrap_or("dall-e-3");
        let mut body = json!({
            "model": model,
            "prompt": params::required_str(map, "prompt", MAX_PROMPT_CHARS)?,
            "n": params::optional_int(map, "n", 1, 4)?.unwrap_or(1),
            "size": params::optional_choice(map, "size", SIZES)?.unwrap_or("1024x1024"),
            "response_format": "url",
        });
        if let Some(quality) = params::optional_choice(map, "quality", QUALITIES)? {
            body["quality"] = json!(quality);
        }
        if let Some(style) = params::optional_choice(map, "style", STYLES)? {
            body["style"] = json!(style);
        }
        if let Some(callback) = &self.settings.callback_url {
            body["callback_url"] = json!(callback);
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for DalleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ImageA
    }

    fn validate(&self, params: &Value) -> Result<(), ProviderError> {
        let map = params::object(params)?;
        params::required_str(map, "prompt", MAX_PROMPT_CHARS)?;
        let model = params::optional_choice(map, "model", MODELS)?.unwrap_or("dall-e-3");
        let n = params::optional_int(map, "n", 1, 4)?.unwrap_or(1);
        if model == "dall-e-3" && n != 1 {
            return Err(ProviderError::InvalidParams(
                "dall-e-3 generates exactly one image per request".into(),
            ));
        }
        let size = params::optional_choice(map, "size", SIZES)?;
        if model == "dall-e-3" && matches!(size, Some("256x256" | "512x512")) {
            return Err(ProviderError::InvalidParams(
                "dall-e-3 does not support sizes below 1024x1024".into(),
            ));
        }
        params::optional_choice(map, "quality", QUALITIES)?;
        params::optional_choice(map, "style", STYLES)?;
        Ok(())
    }

    async fn submit(&self, params: &Value) -> Result<String, ProviderError> {
        let body = self.submit_body(params)?;
        let response = http::send(
            self.client
                .post(self.settings.url("/v1/images/generations/async"))
                .bearer_auth(&self.settings.api_key)
                .json(&body),
        )
        .await?;
        let ack: SubmitResponse = http::parse_response(response).await?;
        if ack.task_id.trim().is_empty() {
            return Err(ProviderError::Unavailable("empty task id in acknowledgment".into()));
        }
        Ok(ack.task_id)
    }

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, ProviderError> {
        let response = http::send(
            self.client
                .get(self.settings.url(&format!("/v1/images/tasks/{remote_id}")))
                .bearer_auth(&self.settings.api_key),
        )
        .await?;
        let task: DalleTask = http::parse_response(response).await?;
        Ok(task.remote_status())
    }

    fn parse_notification(&self, raw: &RawNotification) -> Result<Notification, ProviderError> {
        http::verify_signature(raw, &self.settings.webhook_secret)?;
        let task: DalleTask = http::decode_body(raw)?;
        if task.task_id.trim().is_empty() {
            return Err(ProviderError::MalformedNotification("missing task_id".into()));
        }
        Ok(Notification {
            status: task.remote_status(),
            remote_id: task.task_id,
        })
    }
}
