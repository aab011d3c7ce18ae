//! Music provider: Suno behind the task relay.
//!
//! Submission:   `POST {api_url}/suno/submit/music` -> envelope with the task id
//! Status:       `GET  {api_url}/suno/fetch/{task_id}` -> envelope with a task
//! Notification: the fetch envelope, signed with `X-Signature`.
//!
//! A finished task holds one or more clips; each clip's `audio_url` is an
//! asset, in clip order.

use async_trait::async_trait;
use genforge_core::provider::ProviderKind;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{Notification, ProviderAdapter, ProviderError, RawNotification, RemoteStatus};
use crate::http;
use crate::params;
use crate::relay::{self, RelayTask};
use crate::settings::ProviderSettings;

const MAX_LYRICS_CHARS: usize = 3000;
const MAX_DESCRIPTION_CHARS: usize = 400;
const MAX_TITLE_CHARS: usize = 80;
const MAX_TAGS_CHARS: usize = 200;
const MODELS: &[&str] = &["chirp-v3-0", "chirp-v3-5", "chirp-v4"];
const FAILED: &str = "Music generation failed";

/// One generated clip.
#[derive(Debug, Deserialize)]
pub struct SunoClip {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub audio_url: String,
    #[serde(default)]
    pub title: String,
}

#[allow(clippy::ptr_arg)]
fn clip_assets(clips: &Vec<SunoClip>) -> Vec<String> {
    clips
        .iter()
        .map(|c| c.audio_url.trim())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

/// Adapter for the music provider.
pub struct SunoAdapter {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl SunoAdapter {
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
            "mv": params::optional_choice(map, "model", MODELS)?.unwrap_or("chirp-v3-5"),
            "make_instrumental": params::optional_bool(map, "instrumental")?.unwrap_or(false),
        });
        if let Some(lyrics) = params::optional_str(map, "lyrics", MAX_LYRICS_CHARS)? {
            body["prompt"] = json!(lyrics);
        }
        if let Some(description) = params::optional_str(map, "description", MAX_DESCRIPTION_CHARS)? {
            body["gpt_description_prompt"] = json!(description);
        }
        if let Some(title) = params::optional_str(map, "title", MAX_TITLE_CHARS)? {
            body["title"] = json!(title);
        }
        if let Some(tags) = params::optional_str(map, "tags", MAX_TAGS_CHARS)? {
            body["tags"] = json!(tags);
        }
        if let Some(clip) = params::optional_str(map, "continue_clip_id", 64)? {
            body["continue_clip_id"] = json!(clip);
            body["continue_at"] = json!(params::optional_int(map, "continue_at", 0, 480)?.unwrap_or(0));
            body["task"] = json!("extend");
        }
        if let Some(callback) = &self.settings.callback_url {
            body["notify_hook"] = json!(callback);
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for SunoAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Music
    }

    /// Either `lyrics` (custom mode) or `description` (inspiration mode)
    /// must be present. Custom mode also requires a title and style tags.
    fn validate(&self, params: &Value) -> Result<(), ProviderError> {
        let map = params::object(params)?;
        let lyrics = params::optional_str(map, "lyrics", MAX_LYRICS_CHARS)?;
        let description = params::optional_str(map, "description", MAX_DESCRIPTION_CHARS)?;
        let title = params::optional_str(map, "title", MAX_TITLE_CHARS)?;
        let tags = params::optional_str(map, "tags", MAX_TAGS_CHARS)?;
        let instrumental = params::optional_bool(map, "instrumental")?.unwrap_or(false);

        match (lyrics, description) {
            (None, None) => {
                return Err(ProviderError::InvalidParams(
                    "either lyrics or description is required".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ProviderError::InvalidParams(
                    "lyrics and description are mutually exclusive".into(),
                ))
            }
            (Some(_), None) if title.is_none() || tags.is_none() => {
                return Err(ProviderError::InvalidParams(
                    "custom lyrics require a title and tags".into(),
                ))
            }
            _ => {}
        }
        if instrumental && lyrics.is_some() {
            return Err(ProviderError::InvalidParams(
                "an instrumental track cannot have lyrics".into(),
            ));
        }
        params::optional_choice(map, "model", MODELS)?;
        params::optional_str(map, "continue_clip_id", 64)?;
        params::optional_int(map, "continue_at", 0, 480)?;
        Ok(())
    }

    async fn submit(&self, params: &Value) -> Result<String, ProviderError> {
        let body = self.submit_body(params)?;
        let response = http::send(
            self.client
                .post(self.settings.url("/suno/submit/music"))
                .bearer_auth(&self.settings.api_key)
                .json(&body),
        )
        .await?;
        relay::task_id_from(response).await
    }

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, ProviderError> {
        let response = http::send(
            self.client
                .get(self.settings.url(&format!("/suno/fetch/{remote_id}")))
                .bearer_auth(&self.settings.api_key),
        )
        .await?;
        let task: RelayTask<Vec<SunoClip>> = relay::task_from(response).await?;
        Ok(task.remote_status(FAILED, clip_assets))
    }

    fn parse_notification(&self, raw: &RawNotification) -> Result<Notification, ProviderError> {
        http::verify_signature(raw, &self.settings.webhook_secret)?;
        let task: RelayTask<Vec<SunoClip>> = relay::task_from_push(&raw.body)?;
        Ok(Notification {
            status: task.remote_status(FAILED, clip_assets),
            remote_id: task.task_id,
        })
    }
}
