//! Repository layer: one zero-sized struct per table with async
//! associated functions taking `&PgPool`.

pub mod job_repo;
pub mod ledger_repo;

pub use job_repo::JobRepo;
pub use ledger_repo::{DebitOutcome, LedgerRepo, RefundOutcome};
