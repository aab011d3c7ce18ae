/// Owner (user) identifiers are PostgreSQL BIGSERIAL keys owned by the
/// account system.
pub type DbId = i64;

/// Job identifiers are time-ordered UUIDs assigned at creation.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Allocate a fresh, time-ordered job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
