//! The adapter contract every provider integration implements.

use std::collections::HashMap;

use async_trait::async_trait;
use genforge_core::provider::ProviderKind;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by a provider adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request parameters failed local validation. Nothing was sent.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// The provider validated the request and refused it. Not retryable.
    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    /// Transport failure, timeout or provider-side error. Retryable.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// A pushed payload could not be authenticated or attributed.
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),
}

impl ProviderError {
    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Remote status
// ---------------------------------------------------------------------------

/// The provider's view of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Still running; `progress` is a percentage when the provider reports one.
    InProgress { progress: Option<i16> },
    /// Finished; remote URLs of the produced media, in provider order.
    Succeeded { assets: Vec<String> },
    /// Finished without output.
    Failed { reason: String },
}

impl RemoteStatus {
    /// In progress with a percentage clamped to `0..=100`.
    pub fn in_progress(progress: Option<i16>) -> Self {
        Self::InProgress {
            progress: progress.map(|p| p.clamp(0, 100)),
        }
    }
}

/// A parsed, authenticated push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub remote_id: String,
    pub status: RemoteStatus,
}

/// A push payload as received by the HTTP layer.
///
/// Header names are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct RawNotification {
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawNotification {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Attach a header. Later values for the same name replace earlier ones.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Wire protocol of one provider family.
///
/// Implementations perform outbound network calls only; they never mutate
/// job state. `poll` must be safe to call any number of times, in any
/// order relative to pushed notifications for the same job.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider family this adapter speaks for.
    fn kind(&self) -> ProviderKind;

    /// Validate request parameters without contacting the provider.
    fn validate(&self, params: &serde_json::Value) -> Result<(), ProviderError>;

    /// Submit a job and return the provider-assigned remote identifier.
    async fn submit(&self, params: &serde_json::Value) -> Result<String, ProviderError>;

    /// Fetch the current remote status of a submitted job.
    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, ProviderError>;

    /// Authenticate and parse a pushed notification.
    fn parse_notification(&self, raw: &RawNotification) -> Result<Notification, ProviderError>;
}
