//! Domain types shared by every genforge crate.
//!
//! Holds the job state machine, provider kinds, asset references and
//! the small pure helpers (backoff, signatures, hashing) that both the
//! persistence layer and the generation engine need. This crate has no
//! internal dependencies.

pub mod alert;
pub mod asset;
pub mod backoff;
pub mod error;
pub mod hashing;
pub mod job;
pub mod job_events;
pub mod provider;
pub mod signature;
pub mod types;
