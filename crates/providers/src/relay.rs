//! Envelope format of the task relay fronting the music and video providers.
//!
//! Every response is `{"code": "success" | <error code>, "message": .., "data": ..}`.
//! Submissions return the task id as `data`; fetches and pushes carry a
//! [`RelayTask`] whose `data` holds the provider-specific result.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::adapter::{ProviderError, RemoteStatus};
use crate::http;

const CODE_SUCCESS: &str = "success";

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap `data` from a successful envelope.
    ///
    /// A non-success code on a 2xx response is the relay refusing the
    /// request.
    pub fn into_data(self) -> Result<T, ProviderError> {
        if self.code != CODE_SUCCESS {
            let message = self.message.trim();
            return Err(ProviderError::Rejected(if message.is_empty() {
                format!("relay refused the request ({})", self.code)
            } else {
                http::truncate(message)
            }));
        }
        self.data
            .ok_or_else(|| ProviderError::Unavailable("relay response carried no data".into()))
    }
}

/// Task record kept by the relay.
#[derive(Debug, Deserialize)]
pub(crate) struct RelayTask<D> {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fail_reason: String,
    #[serde(default)]
    pub progress: String,
    pub data: Option<D>,
}

impl<D> RelayTask<D> {
    /// Map the relay status, using `assets` to extract URLs on success.
    pub fn remote_status(&self, fallback_reason: &str, assets: impl FnOnce(&D) -> Vec<String>) -> RemoteStatus {
        match self.status.as_str() {
            "SUCCESS" => RemoteStatus::Succeeded {
                assets: self.data.as_ref().map(assets).unwrap_or_default(),
            },
            "FAILURE" => {
                let reason = self.fail_reason.trim();
                RemoteStatus::Failed {
                    reason: if reason.is_empty() {
                        fallback_reason.to_string()
                    } else {
                        http::truncate(reason)
                    },
                }
            }
            // NOT_START, SUBMITTED, QUEUED, IN_PROGRESS
            _ => RemoteStatus::in_progress(http::parse_percent(&self.progress)),
        }
    }
}

/// Decode a submission acknowledgment into the relay task id.
pub(crate) async fn task_id_from(response: reqwest::Response) -> Result<String, ProviderError> {
    let envelope: Envelope<String> = http::parse_response(response).await?;
    let id = envelope.into_data()?;
    if id.trim().is_empty() {
        return Err(ProviderError::Unavailable("empty task id in acknowledgment".into()));
    }
    Ok(id)
}

/// Decode a fetch response into the task record.
pub(crate) async fn task_from<D: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<RelayTask<D>, ProviderError> {
    let envelope: Envelope<RelayTask<D>> = http::parse_response(response).await?;
    envelope.into_data()
}

/// Decode a pushed envelope. Any shape problem is a malformed notification.
pub(crate) fn task_from_push<D: DeserializeOwned>(body: &[u8]) -> Result<RelayTask<D>, ProviderError> {
    let envelope: Envelope<RelayTask<D>> = serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedNotification(format!("undecodable body: {e}")))?;
    let task = envelope
        .into_data()
        .map_err(|e| ProviderError::MalformedNotification(e.to_string()))?;
    if task.task_id.trim().is_empty() {
        return Err(ProviderError::MalformedNotification("missing task_id".into()));
    }
    Ok(task)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn non_success_code_is_rejection() {
        let env: Envelope<String> =
            serde_json::from_value(json!({"code": "error", "message": "insufficient quota"})).unwrap();
        assert_matches!(env.into_data(), Err(ProviderError::Rejected(m)) if m == "insufficient quota");

        let env: Envelope<String> = serde_json::from_value(json!({"code": "fail_to_submit"})).unwrap();
        assert_matches!(
            env.into_data(),
            Err(ProviderError::Rejected(m)) if m == "relay refused the request (fail_to_submit)"
        );
    }

    #[test]
    fn success_without_data_is_retryable() {
        let env: Envelope<String> = serde_json::from_value(json!({"code": "success"})).unwrap();
        assert_matches!(env.into_data(), Err(ProviderError::Unavailable(_)));
    }

    #[test]
    fn relay_status_mapping() {
        let task: RelayTask<Vec<String>> = serde_json::from_value(json!({
            "task_id": "r1", "status": "IN_PROGRESS", "progress": "30%"
        }))
        .unwrap();
        assert_eq!(
            task.remote_status("failed", |d| d.clone()),
            RemoteStatus::InProgress { progress: Some(30) }
        );

        let task: RelayTask<Vec<String>> = serde_json::from_value(json!({
            "task_id": "r1", "status": "SUCCESS", "data": ["https://a", "https://b"]
        }))
        .unwrap();
        assert_eq!(
            task.remote_status("failed", |d| d.clone()),
            RemoteStatus::Succeeded { assets: vec!["https://a".into(), "https://b".into()] }
        );

        let task: RelayTask<Vec<String>> =
            serde_json::from_value(json!({"task_id": "r1", "status": "FAILURE"})).unwrap();
        assert_eq!(
            task.remote_status("Music generation failed", |d| d.clone()),
            RemoteStatus::Failed { reason: "Music generation failed".into() }
        );
    }

    #[test]
    fn push_without_task_id_is_malformed() {
        let body = br#"{"code":"success","data":{"task_id":"","status":"SUCCESS"}}"#;
        assert_matches!(
            task_from_push::<Vec<String>>(body),
            Err(ProviderError::MalformedNotification(_))
        );
        let body = br#"{"code":"error","message":"x"}"#;
        assert_matches!(
            task_from_push::<Vec<String>>(body),
            Err(ProviderError::MalformedNotification(_))
        );
    }
}
