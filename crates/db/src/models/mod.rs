pub mod job;
pub mod ledger;
