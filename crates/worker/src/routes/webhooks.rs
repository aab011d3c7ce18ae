//! Provider notification intake.
//!
//! Responses tell the provider whether to redeliver: 200 for anything
//! handled (including notifications that changed nothing), 400 for
//! payloads that will never be accepted, 5xx when storage failed.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use genforge_core::provider::ProviderKind;
use genforge_pipeline::{IgnoreReason, IntakeOutcome};
use genforge_providers::RawNotification;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'static str>,
}

/// POST /api/v1/webhooks/{provider}
pub async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookResponse>> {
    let kind = ProviderKind::from_name(&provider)
        .map_err(|_| AppError::NotFound(format!("Unknown provider '{provider}'")))?;

    let raw = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .fold(RawNotification::new(body.to_vec()), |raw, (name, value)| {
            raw.with_header(name, value)
        });

    let response = match state.service.handle_notification(kind, &raw).await? {
        IntakeOutcome::Applied { state, .. } => WebhookResponse {
            status: "applied",
            state: Some(state.name()),
        },
        IntakeOutcome::ProgressRecorded { .. } => WebhookResponse {
            status: "progress",
            state: None,
        },
        IntakeOutcome::Ignored(IgnoreReason::UnknownRemoteId) => WebhookResponse {
            status: "unknown",
            state: None,
        },
        IntakeOutcome::Ignored(IgnoreReason::AlreadySettled) => WebhookResponse {
            status: "ignored",
            state: None,
        },
        IntakeOutcome::Dropped { reason } => return Err(AppError::InvalidNotification(reason)),
    };
    Ok(Json(response))
}
