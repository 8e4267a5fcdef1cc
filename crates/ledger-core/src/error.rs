use thiserror::Error;

/// Faults raised by the posting engine, lot tracker and report generators.
///
/// `UnbalancedEntry` and `UnknownAccount` reject a journal before anything is
/// written. `OrphanLeg` marks a close with no matching open lot and is left
/// for manual reconciliation. `NegativeQuantity` and `PostingImmutability`
/// are integrity faults that abort the whole commit.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unbalanced entry: debits {debits_cents} != credits {credits_cents}")]
    UnbalancedEntry {
        debits_cents: i64,
        credits_cents: i64,
    },

    #[error("Unknown account {code} for user {user_id}")]
    UnknownAccount { user_id: i64, code: String },

    #[error("Orphan leg {leg_index}: no open {position_type} lot for {instrument}")]
    OrphanLeg {
        leg_index: usize,
        instrument: String,
        position_type: String,
    },

    #[error("Negative quantity on leg {leg_index}: {requested} requested, {available} open for {instrument}")]
    NegativeQuantity {
        leg_index: usize,
        instrument: String,
        requested: i64,
        available: i64,
    },

    #[error("Posting immutability violation: {0}")]
    PostingImmutability(String),

    #[error("Invalid leg {leg_index}: {reason}")]
    InvalidLeg { leg_index: usize, reason: String },

    #[error("Version conflict on account {account_id}")]
    VersionConflict { account_id: i64 },

    #[error("Wash sale adjustment failed: {0}")]
    WashSaleAdjustment(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
