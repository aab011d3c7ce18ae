//! Usage ledger rows: per-owner balances and the append-only entry log.

use genforge_core::types::{DbId, JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Kind of a ledger entry. Discriminants match `ledger_entry_kinds`.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Debit = 1,
    Refund = 2,
    Grant = 3,
}

impl LedgerEntryKind {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::Debit),
            2 => Some(Self::Refund),
            3 => Some(Self::Grant),
            _ => None,
        }
    }
}

/// A row from the `ledger_entries` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: DbId,
    pub owner_id: DbId,
    pub job_id: Option<JobId>,
    pub kind_id: i16,
    pub amount: i64,
    pub balance_after: i64,
    pub note: Option<String>,
    pub created_at: Timestamp,
}

impl LedgerEntry {
    pub fn kind(&self) -> Option<LedgerEntryKind> {
        LedgerEntryKind::from_id(self.kind_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ids_match_seed_data() {
        assert_eq!(LedgerEntryKind::Debit.id(), 1);
        assert_eq!(LedgerEntryKind::Refund.id(), 2);
        assert_eq!(LedgerEntryKind::Grant.id(), 3);
        assert_eq!(LedgerEntryKind::from_id(2), Some(LedgerEntryKind::Refund));
        assert_eq!(LedgerEntryKind::from_id(9), None);
    }
}
