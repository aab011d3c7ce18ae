//! HTTP plumbing shared by the adapters.
//!
//! Status mapping: 4xx responses are the provider refusing the request
//! ([`ProviderError::Rejected`]); 408, 425, 429, 5xx and any transport
//! error are [`ProviderError::Unavailable`].

use genforge_core::signature::verify_webhook_hmac;
use serde::de::DeserializeOwned;

use crate::adapter::{ProviderError, RawNotification};
use crate::settings::ProviderSettings;
use crate::SIGNATURE_HEADER;

/// Longest provider message carried into an error.
const MAX_MESSAGE_LEN: usize = 200;

/// Build a client whose every request is bounded by the provider timeout.
pub(crate) fn build_client(settings: &ProviderSettings) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("HTTP client setup failed: {e}")))
}

/// Send a request, mapping transport failures to `Unavailable`.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Unavailable("request timed out".into())
        } else {
            ProviderError::Unavailable(format!("request failed: {e}"))
        }
    })
}

/// Ensure the response has a success status code.
///
/// The raw body is logged but never copied verbatim into the error; only
/// a short message field extracted from it is.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    tracing::warn!(status = status.as_u16(), body = %body, "Provider returned an error status");
    Err(classify_status(status.as_u16(), &body))
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let response = ensure_success(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Unavailable(format!("unreadable provider response: {e}")))
}

/// Map a non-2xx status to the adapter error taxonomy.
pub(crate) fn classify_status(status: u16, body: &str) -> ProviderError {
    let message = extract_message(body).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        408 | 425 | 429 => ProviderError::Unavailable(message),
        400..=499 => ProviderError::Rejected(message),
        _ => ProviderError::Unavailable(message),
    }
}

/// Pull a human readable message out of a JSON error body.
///
/// Recognizes `{"error": {"message": ..}}`, `{"error": ".."}`,
/// `{"message": ".."}` and `{"description": ".."}`.
pub(crate) fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = value
        .pointer("/error/message")
        .or_else(|| value.get("error"))
        .or_else(|| value.get("message"))
        .or_else(|| value.get("description"))
        .and_then(|v| v.as_str())?
        .trim();
    if message.is_empty() {
        return None;
    }
    Some(truncate(message))
}

pub(crate) fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    message.chars().take(MAX_MESSAGE_LEN).collect()
}

/// Reject a notification whose HMAC header does not match its body.
pub(crate) fn verify_signature(raw: &RawNotification, secret: &str) -> Result<(), ProviderError> {
    let signature = raw
        .header(SIGNATURE_HEADER)
        .ok_or_else(|| ProviderError::MalformedNotification("missing signature".into()))?;
    if !verify_webhook_hmac(secret, &raw.body, signature) {
        return Err(ProviderError::MalformedNotification("bad signature".into()));
    }
    Ok(())
}

/// Decode a notification body, mapping failures to `MalformedNotification`.
pub(crate) fn decode_body<T: DeserializeOwned>(raw: &RawNotification) -> Result<T, ProviderError> {
    serde_json::from_slice(&raw.body)
        .map_err(|e| ProviderError::MalformedNotification(format!("undecodable body: {e}")))
}

/// Parse a `"45%"`-style progress string.
pub(crate) fn parse_percent(raw: &str) -> Option<i16> {
    let digits = raw.trim().trim_end_matches('%').trim();
    if digits.is_empty() {
        return None;
    }
    digits
        .parse::<f64>()
        .ok()
        .map(|p| p.round().clamp(0.0, 100.0) as i16)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genforge_core::signature::compute_webhook_hmac;

    use super::*;

    #[test]
    fn client_errors_are_rejections() {
        assert_matches!(classify_status(400, ""), ProviderError::Rejected(m) if m == "HTTP 400");
        assert_matches!(classify_status(422, ""), ProviderError::Rejected(_));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert_matches!(classify_status(429, ""), ProviderError::Unavailable(_));
        assert_matches!(classify_status(408, ""), ProviderError::Unavailable(_));
        assert_matches!(classify_status(502, ""), ProviderError::Unavailable(_));
    }

    #[test]
    fn message_is_extracted_from_common_shapes() {
        assert_eq!(
            extract_message(r#"{"error":{"message":"content policy"}}"#).as_deref(),
            Some("content policy")
        );
        assert_eq!(extract_message(r#"{"error":"bad size"}"#).as_deref(), Some("bad size"));
        assert_eq!(extract_message(r#"{"message":"quota"}"#).as_deref(), Some("quota"));
        assert_eq!(extract_message(r#"{"description":"banned"}"#).as_deref(), Some("banned"));
        assert_eq!(extract_message("<html>oops</html>"), None);
        assert_eq!(extract_message(r#"{"message":"  "}"#), None);
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn signature_must_match_body() {
        let body = br#"{"id":"t1"}"#.to_vec();
        let good = compute_webhook_hmac("secret", &body);

        let raw = RawNotification::new(body.clone()).with_header("X-Signature", good);
        assert!(verify_signature(&raw, "secret").is_ok());

        let raw = RawNotification::new(body.clone()).with_header("X-Signature", "deadbeef");
        assert_matches!(
            verify_signature(&raw, "secret"),
            Err(ProviderError::MalformedNotification(_))
        );

        let raw = RawNotification::new(body);
        assert_matches!(
            verify_signature(&raw, "secret"),
            Err(ProviderError::MalformedNotification(m)) if m == "missing signature"
        );
    }

    #[test]
    fn percent_strings() {
        assert_eq!(parse_percent("45%"), Some(45));
        assert_eq!(parse_percent(" 7 % "), Some(7));
        assert_eq!(parse_percent("100"), Some(100));
        assert_eq!(parse_percent("12.6%"), Some(13));
        assert_eq!(parse_percent(""), None);
        assert_eq!(parse_percent("n/a"), None);
    }
}
