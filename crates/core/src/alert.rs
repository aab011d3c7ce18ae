//! Operational alerts raised when the engine gives up on a retry loop.

use serde::Serialize;

use crate::provider::ProviderKind;
use crate::types::{JobId, Timestamp};

/// What kind of retry budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Submission kept failing with transport errors; the job was failed
    /// and refunded.
    SubmitRetriesExhausted,
    /// Asset downloads kept failing; the job stays Succeeded.
    RetrievalRetriesExhausted,
}

/// A single alert for operators.
#[derive(Debug, Clone, Serialize)]
pub struct OperationalAlert {
    pub kind: AlertKind,
    pub provider: ProviderKind,
    pub job_id: JobId,
    pub attempts: u32,
    pub last_error: String,
    pub raised_at: Timestamp,
}
