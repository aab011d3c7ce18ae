//! Image provider B: Midjourney proxy.
//!
//! Submission:   `POST {api_url}/mj/submit/imagine` -> [`SubmitResponse`]
//! Status:       `GET  {api_url}/mj/task/{id}/fetch` -> [`MjTask`]
//! Notification: the proxy posts the task object to `notifyHook`. The
//! proxy cannot sign payloads, so pushes carry the shared secret in the
//! `mj-api-secret` header instead.

use async_trait::async_trait;
use genforge_core::provider::ProviderKind;
use genforge_core::signature::verify_token;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{Notification, ProviderAdapter, ProviderError, RawNotification, RemoteStatus};
use crate::http;
use crate::params;
use crate::settings::ProviderSettings;

/// Header carrying the API secret, both outbound and on pushes.
pub const SECRET_HEADER: &str = "mj-api-secret";

const MAX_PROMPT_CHARS: usize = 2000;
const MAX_REFERENCE_IMAGES: usize = 5;
const BOT_TYPES: &[&str] = &["MID_JOURNEY", "NIJI_JOURNEY"];

/// Submission accepted.
const CODE_OK: i64 = 1;
/// An identical task already exists; `result` is its id.
const CODE_EXISTS: i64 = 21;
/// Accepted into the proxy's waiting queue.
const CODE_QUEUED: i64 = 22;
/// Proxy is saturated, try again later.
const CODE_QUEUE_FULL: i64 = 23;

/// Acknowledgment envelope of the submit endpoint.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub code: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub result: Option<String>,
}

impl SubmitResponse {
    /// Interpret the proxy's result code.
    pub fn into_task_id(self) -> Result<String, ProviderError> {
        match self.code {
            CODE_OK | CODE_EXISTS | CODE_QUEUED => self
                .result
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| ProviderError::Unavailable("empty task id in acknowledgment".into())),
            CODE_QUEUE_FULL => Err(ProviderError::Unavailable("submission queue is full".into())),
            _ => Err(ProviderError::Rejected(if self.description.trim().is_empty() {
                format!("submission refused (code {})", self.code)
            } else {
                http::truncate(self.description.trim())
            })),
        }
    }
}

/// Task object of the fetch endpoint and of pushes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MjTask {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<MjImage>,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MjImage {
    pub url: String,
}

impl MjTask {
    pub fn remote_status(&self) -> RemoteStatus {
        match self.status.as_str() {
            "SUCCESS" => {
                let mut assets: Vec<String> =
                    self.image_urls.iter().map(|i| i.url.clone()).collect();
                if assets.is_empty() {
                    assets.extend(self.image_url.iter().cloned());
                }
                RemoteStatus::Succeeded { assets }
            }
            "FAILURE" => RemoteStatus::Failed {
                reason: self
                    .fail_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(http::truncate)
                    .unwrap_or_else(|| "Image generation failed".to_string()),
            },
            "CANCEL" => RemoteStatus::Failed {
                reason: "Task was cancelled by the provider".to_string(),
            },
            // NOT_START, SUBMITTED, MODAL, IN_PROGRESS
            _ => RemoteStatus::in_progress(self.progress.as_deref().and_then(http::parse_percent)),
        }
    }
}

/// Adapter for image provider B.
pub struct MidjourneyAdapter {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl MidjourneyAdapter {
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
            "base64Array": map.get("base64_array").cloned().unwrap_or_else(|| json!([])),
            "botType": params::optional_choice(map, "bot_type", BOT_TYPES)?.unwrap_or("MID_JOURNEY"),
        });
        if let Some(callback) = &self.settings.callback_url {
            body["notifyHook"] = json!(callback);
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for MidjourneyAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ImageB
    }

    fn validate(&self, params: &Value) -> Result<(), ProviderError> {
        let map = params::object(params)?;
        params::required_str(map, "prompt", MAX_PROMPT_CHARS)?;
        params::optional_choice(map, "bot_type", BOT_TYPES)?;
        match map.get("base64_array") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                if items.len() > MAX_REFERENCE_IMAGES {
                    return Err(ProviderError::InvalidParams(format!(
                        "at most {MAX_REFERENCE_IMAGES} reference images are allowed"
                    )));
                }
                if !items.iter().all(|i| i.as_str().is_some_and(|s| s.starts_with("data:image/"))) {
                    return Err(ProviderError::InvalidParams(
                        "reference images must be data:image/... base64 strings".into(),
                    ));
                }
            }
            Some(_) => {
                return Err(ProviderError::InvalidParams("base64_array must be an array".into()))
            }
        }
        Ok(())
    }

    async fn submit(&self, params: &Value) -> Result<String, ProviderError> {
        let body = self.submit_body(params)?;
        let response = http::send(
            self.client
                .post(self.settings.url("/mj/submit/imagine"))
                .header(SECRET_HEADER, &self.settings.api_key)
                .json(&body),
        )
        .await?;
        let ack: SubmitResponse = http::parse_response(response).await?;
        ack.into_task_id()
    }

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, ProviderError> {
        let response = http::send(
            self.client
                .get(self.settings.url(&format!("/mj/task/{remote_id}/fetch")))
                .header(SECRET_HEADER, &self.settings.api_key),
        )
        .await?;
        let task: MjTask = http::parse_response(response).await?;
        Ok(task.remote_status())
    }

    fn parse_notification(&self, raw: &RawNotification) -> Result<Notification, ProviderError> {
        let presented = raw
            .header(SECRET_HEADER)
            .ok_or_else(|| ProviderError::MalformedNotification("missing secret header".into()))?;
        if !verify_token(&self.settings.webhook_secret, presented) {
            return Err(ProviderError::MalformedNotification("bad secret".into()));
        }
        let task: MjTask = http::decode_body(raw)?;
        if task.id.trim().is_empty() {
            return Err(ProviderError::MalformedNotification("missing task id".into()));
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

    use super::*;

    fn adapter() -> MidjourneyAdapter {
        MidjourneyAdapter::new(ProviderSettings::new("http://mj.local", "api", "push-secret")).unwrap()
    }

    fn ack(code: i64, description: &str, result: Option<&str>) -> SubmitResponse {
        SubmitResponse {
            code,
            description: description.to_string(),
            result: result.map(str::to_string),
        }
    }

    #[test]
    fn accepted_codes_yield_task_id() {
        assert_eq!(ack(1, "", Some("1700000000")).into_task_id().unwrap(), "1700000000");
        assert_eq!(ack(21, "exists", Some("42")).into_task_id().unwrap(), "42");
        assert_eq!(ack(22, "queued", Some("43")).into_task_id().unwrap(), "43");
        assert_matches!(ack(1, "", None).into_task_id(), Err(ProviderError::Unavailable(_)));
    }

    #[test]
    fn refused_codes_are_rejections_except_queue_full() {
        assert_matches!(
            ack(24, "banned prompt: gore", None).into_task_id(),
            Err(ProviderError::Rejected(m)) if m == "banned prompt: gore"
        );
        assert_matches!(
            ack(4, "", None).into_task_id(),
            Err(ProviderError::Rejected(m)) if m == "submission refused (code 4)"
        );
        assert_matches!(ack(23, "", None).into_task_id(), Err(ProviderError::Unavailable(_)));
    }

    #[test]
    fn task_status_mapping() {
        let task: MjTask = serde_json::from_value(json!({
            "id": "1", "status": "IN_PROGRESS", "progress": "62%"
        }))
        .unwrap();
        assert_eq!(task.remote_status(), RemoteStatus::InProgress { progress: Some(62) });

        let task: MjTask = serde_json::from_value(json!({
            "id": "1", "status": "SUCCESS", "progress": "100%", "imageUrl": "https://cdn/grid.png"
        }))
        .unwrap();
        assert_eq!(
            task.remote_status(),
            RemoteStatus::Succeeded { assets: vec!["https://cdn/grid.png".into()] }
        );

        let task: MjTask = serde_json::from_value(json!({
            "id": "1", "status": "SUCCESS",
            "imageUrl": "https://cdn/grid.png",
            "imageUrls": [{"url": "https://cdn/1.png"}, {"url": "https://cdn/2.png"}]
        }))
        .unwrap();
        assert_matches!(task.remote_status(), RemoteStatus::Succeeded { assets } if assets.len() == 2);

        let task: MjTask = serde_json::from_value(json!({
            "id": "1", "status": "FAILURE", "failReason": "  "
        }))
        .unwrap();
        assert_matches!(task.remote_status(), RemoteStatus::Failed { reason } if reason == "Image generation failed");

        let task: MjTask =
            serde_json::from_value(json!({"id": "1", "status": "NOT_START", "progress": ""})).unwrap();
        assert_eq!(task.remote_status(), RemoteStatus::InProgress { progress: None });
    }

    #[test]
    fn validate_reference_images() {
        let a = adapter();
        assert!(a.validate(&json!({"prompt": "castle --ar 16:9"})).is_ok());
        assert!(a
            .validate(&json!({"prompt": "castle", "base64_array": ["data:image/png;base64,AAAA"]}))
            .is_ok());
        assert_matches!(
            a.validate(&json!({"prompt": "castle", "base64_array": ["http://x/y.png"]})),
            Err(ProviderError::InvalidParams(_))
        );
        assert_matches!(
            a.validate(&json!({"prompt": "castle", "bot_type": "DALL_E"})),
            Err(ProviderError::InvalidParams(_))
        );
    }

    #[test]
    fn notification_is_authenticated_by_secret_header() {
        let a = adapter();
        let body = br#"{"id":"99","status":"SUCCESS","imageUrl":"https://cdn/a.png"}"#.to_vec();

        let ok = a
            .parse_notification(&RawNotification::new(body.clone()).with_header("Mj-Api-Secret", "push-secret"))
            .unwrap();
        assert_eq!(ok.remote_id, "99");

        assert_matches!(
            a.parse_notification(&RawNotification::new(body.clone()).with_header(SECRET_HEADER, "guess")),
            Err(ProviderError::MalformedNotification(_))
        );
        assert_matches!(
            a.parse_notification(&RawNotification::new(body)),
            Err(ProviderError::MalformedNotification(_))
        );
    }
}
