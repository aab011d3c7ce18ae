//! Video provider: Luma Dream Machine behind the task relay.
//!
//! Submission:   `POST {api_url}/luma/generations` -> envelope with the task id
//! Status:       `GET  {api_url}/luma/task/{task_id}` -> envelope with a task
//! Notification: the fetch envelope, signed with `X-Signature`.

use async_trait::async_trait;
use genforge_core::provider::ProviderKind;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{Notification, ProviderAdapter, ProviderError, RawNotification, RemoteStatus};
use crate::http;
use crate::params;
use crate::relay::{self, RelayTask};
use crate::settings::ProviderSettings;

const MAX_PROMPT_CHARS: usize = 2000;
const ASPECT_RATIOS: &[&str] = &["16:9", "9:16", "1:1", "4:3", "3:4", "21:9"];
const FAILED: &str = "Video generation failed";

/// Generation record nested in the relay task.
#[derive(Debug, Deserialize)]
pub struct LumaGeneration {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub video: Option<LumaMedia>,
}

#[derive(Debug, Deserialize)]
pub struct LumaMedia {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// The downloadable video, preferring the full quality `download_url`.
fn video_assets(generation: &LumaGeneration) -> Vec<String> {
    generation
        .video
        .as_ref()
        .and_then(|v| v.download_url.clone().or_else(|| v.url.clone()))
        .filter(|u| !u.trim().is_empty())
        .into_iter()
        .collect()
}

/// Adapter for the video provider.
pub struct LumaAdapter {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl LumaAdapter {
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
            "user_prompt": params::required_str(map, "prompt", MAX_PROMPT_CHARS)?,
            "expand_prompt": params::optional_bool(map, "expand_prompt")?.unwrap_or(true),
            "loop": params::optional_bool(map, "loop")?.unwrap_or(false),
            "aspect_ratio": params::optional_choice(map, "aspect_ratio", ASPECT_RATIOS)?.unwrap_or("16:9"),
        });
        if let Some(url) = params::optional_url(map, "image_url")? {
            body["image_url"] = json!(url);
        }
        if let Some(url) = params::optional_url(map, "image_end_url")? {
            body["image_end_url"] = json!(url);
        }
        if let Some(callback) = &self.settings.callback_url {
            body["notify_hook"] = json!(callback);
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for LumaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Video
    }

    fn validate(&self, params: &Value) -> Result<(), ProviderError> {
        let map = params::object(params)?;
        params::required_str(map, "prompt", MAX_PROMPT_CHARS)?;
        params::optional_bool(map, "expand_prompt")?;
        params::optional_bool(map, "loop")?;
        params::optional_choice(map, "aspect_ratio", ASPECT_RATIOS)?;
        let start = params::optional_url(map, "image_url")?;
        let end = params::optional_url(map, "image_end_url")?;
        if end.is_some() && start.is_none() {
            return Err(ProviderError::InvalidParams(
                "image_end_url requires image_url".into(),
            ));
        }
        Ok(())
    }

    async fn submit(&self, params: &Value) -> Result<String, ProviderError> {
        let body = self.submit_body(params)?;
        let response = http::send(
            self.client
                .post(self.settings.url("/luma/generations"))
                .bearer_auth(&self.settings.api_key)
                .json(&body),
        )
        .await?;
        relay::task_id_from(response).await
    }

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, ProviderError> {
        let response = http::send(
            self.client
                .get(self.settings.url(&format!("/luma/task/{remote_id}")))
                .bearer_auth(&self.settings.api_key),
        )
        .await?;
        let task: RelayTask<LumaGeneration> = relay::task_from(response).await?;
        Ok(task.remote_status(FAILED, video_assets))
    }

    fn parse_notification(&self, raw: &RawNotification) -> Result<Notification, ProviderError> {
        http::verify_signature(raw, &self.settings.webhook_secret)?;
        let task: RelayTask<LumaGeneration> = relay::task_from_push(&raw.body)?;
        Ok(Notification {
            status: task.remote_status(FAILED, video_assets),
            remote_id: task.task_id,
        })
    }
}
