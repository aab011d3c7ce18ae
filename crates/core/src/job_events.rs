//! Message and event type constants for job lifecycle notifications.
//!
//! `MSG_TYPE_*` values are the `type` field of messages pushed to a
//! client's live connection; `EVENT_*` values are `PlatformEvent` names
//! published on the in-process event bus.

/// A job moved to a new lifecycle state.
pub const MSG_TYPE_JOB_STATE_CHANGED: &str = "job_state_changed";

/// Progress update while the provider is still working.
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

pub const EVENT_JOB_STATE_CHANGED: &str = "job.state_changed";

pub const EVENT_JOB_PROGRESS: &str = "job.progress";

/// Operational alert raised by the engine (exhausted retries).
pub const EVENT_JOB_ALERT: &str = "job.alert";
