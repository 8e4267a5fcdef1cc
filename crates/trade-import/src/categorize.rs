//! The categorization sweep: walk a user's un-categorized broker rows, derive
//! legs, group them into trades and commit each one, then park the cash the
//! still-uncommitted rows would move as pending on the cash account.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ledger_core::money::format_cents;
use ledger_core::{chart, InvestmentTransaction, LedgerDb, LedgerError, TradeLeg};
use posting_engine::PostingEngine;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::parse::derive_leg;

/// Outcome of one user's sweep. Orphaned and skipped rows stay
/// un-categorized and count into pending cash until resolved.
#[derive(Debug, Default, Serialize)]
pub struct CategorizeSummary {
    pub user_id: i64,
    pub trades_committed: i64,
    pub rows_categorized: i64,
    pub rows_skipped: i64,
    pub rows_orphaned: i64,
    pub realized_gain_cents: i64,
}

/// Sweep every user with imported rows. One user's failure is logged and
/// does not stop the rest.
pub async fn run_categorization(db: &LedgerDb) -> Result<Vec<CategorizeSummary>, LedgerError> {
    let user_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT DISTINCT user_id FROM investment_transactions ORDER BY user_id")
            .fetch_all(db.pool())
            .await?;

    let mut summaries = Vec::with_capacity(user_ids.len());
    for (user_id,) in user_ids {
        match categorize_user(db, user_id).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => error!("Categorization failed for user {}: {}", user_id, e),
        }
    }
    Ok(summaries)
}

/// Categorize one user's pending rows. Legs group into one trade per
/// (date, symbol) and groups commit in chronological order, so closes see
/// the lots their same-sweep opens created.
pub async fn categorize_user(
    db: &LedgerDb,
    user_id: i64,
) -> Result<CategorizeSummary, LedgerError> {
    let rows: Vec<InvestmentTransaction> = sqlx::query_as(
        r#"
        SELECT * FROM investment_transactions
        WHERE user_id = ? AND trade_num IS NULL
        ORDER BY txn_date ASC, id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(db.pool())
    .await?;

    let mut summary = CategorizeSummary {
        user_id,
        ..CategorizeSummary::default()
    };

    let mut groups: BTreeMap<(NaiveDate, String), Vec<TradeLeg>> = BTreeMap::new();
    for row in &rows {
        match derive_leg(row) {
            Some(leg) => {
                groups
                    .entry((leg.date, leg.instrument.symbol.clone()))
                    .or_default()
                    .push(leg);
            }
            None => {
                warn!(
                    "Row {} for user {} is not a recognizable trade, skipping",
                    row.id.unwrap_or_default(),
                    user_id
                );
                summary.rows_skipped += 1;
            }
        }
    }

    let engine = PostingEngine::new(db.clone());
    for ((date, symbol), legs) in groups {
        let row_count: i64 = legs.iter().map(|leg| leg.source_txn_ids.len() as i64).sum();
        match engine.commit_trade(user_id, &legs, None).await {
            Ok(commit) => {
                if !commit.already_committed {
                    summary.trades_committed += 1;
                    summary.realized_gain_cents += commit.realized_gain_cents;
                }
                summary.rows_categorized += row_count;
            }
            Err(LedgerError::OrphanLeg {
                leg_index,
                instrument,
                position_type,
            }) => {
                warn!(
                    "Trade {} {} for user {} left un-categorized: leg {} has no open {} lot for {}",
                    date, symbol, user_id, leg_index, position_type, instrument
                );
                summary.rows_orphaned += row_count;
            }
            Err(e) => return Err(e),
        }
    }

    let pending = pending_cash_cents(db, user_id).await?;
    let updated = sqlx::query(
        "UPDATE accounts SET pending_cents = ?, version = version + 1 WHERE user_id = ? AND code = ?",
    )
    .bind(pending)
    .bind(user_id)
    .bind(chart::CASH)
    .execute(db.pool())
    .await?;
    if updated.rows_affected() == 0 {
        return Err(LedgerError::UnknownAccount {
            user_id,
            code: chart::CASH.to_string(),
        });
    }

    info!(
        "Categorized user {}: {} trades from {} rows ({} skipped, {} orphaned), realized {}, pending cash {}",
        user_id,
        summary.trades_committed,
        summary.rows_categorized,
        summary.rows_skipped,
        summary.rows_orphaned,
        format_cents(summary.realized_gain_cents),
        format_cents(pending)
    );

    Ok(summary)
}

/// Net cash the remaining un-categorized rows would move once committed.
/// Buys hold cash out, sells bring cash in, anything else moves nothing.
async fn pending_cash_cents(db: &LedgerDb, user_id: i64) -> Result<i64, LedgerError> {
    let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT txn_type, price_cents, quantity, fees_cents
        FROM investment_transactions
        WHERE user_id = ? AND trade_num IS NULL
        "#,
    )
    .bind(user_id)
    .fetch_all(db.pool())
    .await?;

    let mut pending = 0_i64;
    for (txn_type, price_cents, quantity, fees_cents) in rows {
        let gross = price_cents * quantity;
        match txn_type.as_str() {
            "buy" => pending -= gross + fees_cents,
            "sell" => pending += gross - fees_cents,
            _ => {}
        }
    }
    Ok(pending)
}
