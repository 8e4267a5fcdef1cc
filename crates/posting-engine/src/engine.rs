//! The posting engine: atomic trade commits, manual journals and reversals.
//! Everything a commit touches (journal, entries, balances, lots,
//! dispositions, leg records, source annotations) lands in one transaction.

use chrono::Utc;
use ledger_core::money::format_cents;
use ledger_core::{
    chart, EntrySide, JournalLine, JournalTransaction, LedgerDb, LedgerError, TradeLeg,
};
use lot_tracker::{resolve_trade, LegSummary};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::journal::{apply_lines, insert_journal_row, post_journal, validate_lines, JournalDraft};

/// Whole-commit retries after an optimistic version conflict.
const MAX_COMMIT_RETRIES: u32 = 3;

/// Result of committing a trade. When the same source rows come back around,
/// `already_committed` is set and the original journal is returned untouched.
#[derive(Debug, Serialize)]
pub struct TradeCommit {
    pub journal: JournalTransaction,
    pub trade_num: i64,
    pub legs: Vec<LegSummary>,
    pub realized_gain_cents: i64,
    pub already_committed: bool,
}

pub struct PostingEngine {
    db: LedgerDb,
}

impl PostingEngine {
    pub fn new(db: LedgerDb) -> Self {
        Self { db }
    }

    /// Post a manual journal entry. Retries the whole post when another
    /// writer bumps an account version first.
    pub async fn create_journal_entry(
        &self,
        draft: &JournalDraft,
    ) -> Result<JournalTransaction, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = self.db.pool().begin().await?;
            match post_journal(&mut tx, draft).await {
                Ok(journal) => {
                    tx.commit().await?;
                    return Ok(journal);
                }
                Err(LedgerError::VersionConflict { account_id }) if attempt < MAX_COMMIT_RETRIES => {
                    tx.rollback().await?;
                    warn!(
                        "Version conflict on account {} posting journal, attempt {}/{}",
                        account_id, attempt, MAX_COMMIT_RETRIES
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Commit a normalized trade: resolve its legs against the lot inventory,
    /// post the resulting journal and record the legs, all or nothing.
    /// Re-submitting rows that already belong to a committed trade returns
    /// the original result instead of double-posting.
    pub async fn commit_trade(
        &self,
        user_id: i64,
        legs: &[TradeLeg],
        strategy: Option<&str>,
    ) -> Result<TradeCommit, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_commit_trade(user_id, legs, strategy).await {
                Err(LedgerError::VersionConflict { account_id }) if attempt < MAX_COMMIT_RETRIES => {
                    warn!(
                        "Version conflict on account {} committing trade for user {}, attempt {}/{}",
                        account_id, user_id, attempt, MAX_COMMIT_RETRIES
                    );
                }
                result => return result,
            }
        }
    }

    async fn try_commit_trade(
        &self,
        user_id: i64,
        legs: &[TradeLeg],
        strategy: Option<&str>,
    ) -> Result<TradeCommit, LedgerError> {
        let Some(entry_date) = legs.iter().map(|leg| leg.date).max() else {
            return Err(LedgerError::InvalidLeg {
                leg_index: 0,
                reason: "trade has no legs".to_string(),
            });
        };

        let mut tx = self.db.pool().begin().await?;

        let source_ids: BTreeSet<i64> = legs
            .iter()
            .flat_map(|leg| leg.source_txn_ids.iter().copied())
            .collect();
        if !source_ids.is_empty() {
            if let Some(prior) = prior_commit(&mut tx, user_id, &source_ids).await? {
                return Ok(prior);
            }
        }

        let (trade_num,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(trade_num), 0) + 1 FROM trade_legs WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        let mut symbols: Vec<String> = Vec::new();
        for leg in legs {
            if !symbols.contains(&leg.instrument.symbol) {
                symbols.push(leg.instrument.symbol.clone());
            }
        }

        let draft = JournalDraft {
            user_id,
            entry_date,
            description: format!("Trade {}: {}", trade_num, symbols.join("/")),
            strategy: strategy.map(|s| s.to_string()),
            trade_num: Some(trade_num),
            reverses_journal_id: None,
            lines: Vec::new(),
        };
        let journal = insert_journal_row(&mut tx, &draft).await?;
        let Some(journal_id) = journal.id else {
            return Err(LedgerError::Database(sqlx::Error::RowNotFound));
        };

        let resolution = resolve_trade(&mut tx, user_id, legs, journal_id).await?;
        let plan = validate_lines(&mut tx, user_id, &resolution.lines).await?;
        apply_lines(&mut tx, journal_id, &plan).await?;

        for (i, leg) in legs.iter().enumerate() {
            insert_trade_leg(&mut tx, user_id, trade_num, i, leg).await?;
        }

        // Annotating the source rows is what makes a later re-submit
        // recognizable as this trade.
        for id in &source_ids {
            sqlx::query(
                r#"
                UPDATE investment_transactions
                SET account_code = ?, strategy = ?, trade_num = ?
                WHERE id = ? AND user_id = ?
                "#,
            )
            .bind(chart::CASH)
            .bind(strategy)
            .bind(trade_num)
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            "Committed trade {} for user {}: {} legs, realized {}",
            trade_num,
            user_id,
            legs.len(),
            format_cents(resolution.realized_gain_cents)
        );

        Ok(TradeCommit {
            journal,
            trade_num,
            legs: resolution.legs,
            realized_gain_cents: resolution.realized_gain_cents,
            already_committed: false,
        })
    }

    /// Post a correcting journal that mirrors every entry of `journal_id` on
    /// the opposite side, dated today. The original stays untouched and a
    /// journal can only be reversed once. Lot history is not rewound; closes
    /// booked in error need their own offsetting trade.
    pub async fn reverse_journal(
        &self,
        user_id: i64,
        journal_id: i64,
    ) -> Result<JournalTransaction, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_reverse_journal(user_id, journal_id).await {
                Err(LedgerError::VersionConflict { account_id }) if attempt < MAX_COMMIT_RETRIES => {
                    warn!(
                        "Version conflict on account {} reversing journal {}, attempt {}/{}",
                        account_id, journal_id, attempt, MAX_COMMIT_RETRIES
                    );
                }
                result => return result,
            }
        }
    }

    async fn try_reverse_journal(
        &self,
        user_id: i64,
        journal_id: i64,
    ) -> Result<JournalTransaction, LedgerError> {
        let mut tx = self.db.pool().begin().await?;

        let original = sqlx::query_as::<_, JournalTransaction>(
            "SELECT * FROM journal_transactions WHERE id = ? AND user_id = ?",
        )
        .bind(journal_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            LedgerError::PostingImmutability(format!(
                "journal {} not found for user {}",
                journal_id, user_id
            ))
        })?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM journal_transactions WHERE user_id = ? AND reverses_journal_id = ?",
        )
        .bind(user_id)
        .bind(journal_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((reversal_id,)) = existing {
            return Err(LedgerError::PostingImmutability(format!(
                "journal {} already reversed by journal {}",
                journal_id, reversal_id
            )));
        }

        let entries: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT a.code, e.side, e.amount_cents
            FROM ledger_entries e
            JOIN accounts a ON a.id = e.account_id
            WHERE e.journal_id = ?
            ORDER BY e.id ASC
            "#,
        )
        .bind(journal_id)
        .fetch_all(&mut *tx)
        .await?;
        if entries.is_empty() {
            return Err(LedgerError::PostingImmutability(format!(
                "journal {} has no entries to reverse",
                journal_id
            )));
        }

        let mut lines = Vec::with_capacity(entries.len());
        for (code, side, amount_cents) in entries {
            let side = EntrySide::parse(&side).ok_or_else(|| {
                LedgerError::PostingImmutability(format!(
                    "journal {} entry on {} has unreadable side {:?}",
                    journal_id, code, side
                ))
            })?;
            lines.push(JournalLine {
                account_code: code,
                side: side.opposite(),
                amount_cents,
            });
        }

        let draft = JournalDraft {
            user_id,
            entry_date: Utc::now().date_naive(),
            description: format!("Reversal of journal {}: {}", journal_id, original.description),
            strategy: original.strategy.clone(),
            trade_num: None,
            reverses_journal_id: Some(journal_id),
            lines,
        };
        let reversal = post_journal(&mut tx, &draft).await?;
        tx.commit().await?;
        info!(
            "Reversed journal {} with journal {} for user {}",
            journal_id,
            reversal.id.unwrap_or_default(),
            user_id
        );

        Ok(reversal)
    }
}

/// Look the source rows up inside the commit transaction. All rows already
/// annotated with the same trade means this trade was committed before; a
/// partial or conflicting annotation means the books were touched out of
/// band and the commit must not proceed.
async fn prior_commit(
    conn: &mut SqliteConnection,
    user_id: i64,
    source_ids: &BTreeSet<i64>,
) -> Result<Option<TradeCommit>, LedgerError> {
    let placeholders = vec!["?"; source_ids.len()].join(", ");
    let sql = format!(
        "SELECT trade_num FROM investment_transactions WHERE user_id = ? AND id IN ({placeholders})"
    );
    let mut query = sqlx::query_as::<_, (Option<i64>,)>(&sql).bind(user_id);
    for id in source_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(&mut *conn).await?;

    if rows.len() != source_ids.len() {
        return Err(LedgerError::PostingImmutability(format!(
            "{} source rows referenced but only {} exist",
            source_ids.len(),
            rows.len()
        )));
    }
    let Some(&(first,)) = rows.first() else {
        return Ok(None);
    };
    if rows.iter().any(|row| row.0 != first) {
        return Err(LedgerError::PostingImmutability(
            "source rows span more than one committed trade".to_string(),
        ));
    }
    let Some(trade_num) = first else {
        return Ok(None);
    };

    let journal = sqlx::query_as::<_, JournalTransaction>(
        "SELECT * FROM journal_transactions WHERE user_id = ? AND trade_num = ?",
    )
    .bind(user_id)
    .bind(trade_num)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        LedgerError::PostingImmutability(format!(
            "source rows carry trade {} but its journal is missing",
            trade_num
        ))
    })?;

    let mut realized = 0;
    if let Some(journal_id) = journal.id {
        let (sum,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(realized_gain_cents), 0) FROM lot_dispositions WHERE user_id = ? AND journal_id = ?",
        )
        .bind(user_id)
        .bind(journal_id)
        .fetch_one(&mut *conn)
        .await?;
        realized = sum;
    }

    Ok(Some(TradeCommit {
        journal,
        trade_num,
        legs: Vec::new(),
        realized_gain_cents: realized,
        already_committed: true,
    }))
}

async fn insert_trade_leg(
    conn: &mut SqliteConnection,
    user_id: i64,
    trade_num: i64,
    leg_index: usize,
    leg: &TradeLeg,
) -> Result<(), LedgerError> {
    let (contract_type, strike_cents, expiry) = match &leg.instrument.contract {
        Some(c) => (
            Some(c.contract_type.as_str()),
            Some(c.strike_cents),
            Some(c.expiry),
        ),
        None => (None, None, None),
    };
    let source_txn_ids = if leg.source_txn_ids.is_empty() {
        None
    } else {
        serde_json::to_string(&leg.source_txn_ids).ok()
    };

    sqlx::query(
        r#"
        INSERT INTO trade_legs (user_id, trade_num, leg_index, symbol, contract_type,
                                strike_cents, expiry, action, position_type, quantity,
                                price_cents, fees_cents, leg_date, source_txn_ids, confidence)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(trade_num)
    .bind(leg_index as i64)
    .bind(&leg.instrument.symbol)
    .bind(contract_type)
    .bind(strike_cents)
    .bind(expiry)
    .bind(leg.action.as_str())
    .bind(leg.position_type.as_str())
    .bind(leg.quantity)
    .bind(leg.price_cents)
    .bind(leg.fees_cents)
    .bind(leg.date)
    .bind(source_txn_ids)
    .bind(leg.confidence.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(())
}
