//! Read-side queries over the posted ledger: journal detail, per-account
//! activity and the trial balance.

use chrono::NaiveDate;
use ledger_core::{Account, JournalTransaction, LedgerError};
use serde::Serialize;
use sqlx::SqliteConnection;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JournalEntryDetail {
    pub entry_id: i64,
    pub account_code: String,
    pub account_name: String,
    pub side: String,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct JournalDetail {
    pub journal: JournalTransaction,
    pub entries: Vec<JournalEntryDetail>,
}

/// One journal with its entries, account codes resolved.
pub async fn journal_detail(
    conn: &mut SqliteConnection,
    user_id: i64,
    journal_id: i64,
) -> Result<Option<JournalDetail>, LedgerError> {
    let journal = sqlx::query_as::<_, JournalTransaction>(
        "SELECT * FROM journal_transactions WHERE id = ? AND user_id = ?",
    )
    .bind(journal_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(journal) = journal else {
        return Ok(None);
    };

    let entries = sqlx::query_as::<_, JournalEntryDetail>(
        r#"
        SELECT e.id AS entry_id, a.code AS account_code, a.name AS account_name,
               e.side, e.amount_cents
        FROM ledger_entries e
        JOIN accounts a ON a.id = e.account_id
        WHERE e.journal_id = ?
        ORDER BY e.id ASC
        "#,
    )
    .bind(journal_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(JournalDetail { journal, entries }))
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityRow {
    pub journal_id: i64,
    pub entry_date: NaiveDate,
    pub description: String,
    pub side: String,
    pub amount_cents: i64,
    pub balance_cents: i64,
}

/// Every entry ever posted to one account, in posting order, with the
/// running balance after each.
pub async fn account_activity(
    conn: &mut SqliteConnection,
    user_id: i64,
    account_code: &str,
) -> Result<Vec<ActivityRow>, LedgerError> {
    let account =
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = ? AND code = ?")
            .bind(user_id)
            .bind(account_code)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| LedgerError::UnknownAccount {
                user_id,
                code: account_code.to_string(),
            })?;

    let rows: Vec<(i64, NaiveDate, String, String, i64)> = sqlx::query_as(
        r#"
        SELECT j.id, j.entry_date, j.description, e.side, e.amount_cents
        FROM ledger_entries e
        JOIN journal_transactions j ON j.id = e.journal_id
        WHERE e.account_id = ?
        ORDER BY j.id ASC, e.id ASC
        "#,
    )
    .bind(account.id)
    .fetch_all(&mut *conn)
    .await?;

    let mut activity = Vec::with_capacity(rows.len());
    let mut balance = 0i64;
    for (journal_id, entry_date, description, side, amount_cents) in rows {
        let delta = if side == account.normal_side {
            amount_cents
        } else {
            -amount_cents
        };
        balance += delta;
        activity.push(ActivityRow {
            journal_id,
            entry_date,
            description,
            side,
            amount_cents,
            balance_cents: balance,
        });
    }

    Ok(activity)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrialBalanceRow {
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub normal_side: String,
    pub settled_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct TrialBalance {
    pub rows: Vec<TrialBalanceRow>,
    pub debit_total_cents: i64,
    pub credit_total_cents: i64,
    pub balanced: bool,
}

/// Every account at its settled balance, debit-normal totals against
/// credit-normal totals. The sides agreeing is the books-level check that
/// each posted journal really balanced.
pub async fn trial_balance(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<TrialBalance, LedgerError> {
    let rows = sqlx::query_as::<_, TrialBalanceRow>(
        r#"
        SELECT code, name, account_type, normal_side, settled_cents
        FROM accounts
        WHERE user_id = ?
        ORDER BY code ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut debit_total_cents = 0;
    let mut credit_total_cents = 0;
    for row in &rows {
        if row.normal_side == "D" {
            debit_total_cents += row.settled_cents;
        } else {
            credit_total_cents += row.settled_cents;
        }
    }

    Ok(TrialBalance {
        rows,
        debit_total_cents,
        credit_total_cents,
        balanced: debit_total_cents == credit_total_cents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{post_journal, JournalDraft};
    use ledger_core::{chart, seed_default_chart, JournalLine, LedgerDb};

    async fn setup() -> (LedgerDb, sqlx::pool::PoolConnection<sqlx::Sqlite>) {
        let db = LedgerDb::new("sqlite::memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        seed_default_chart(&mut conn, 1).await.unwrap();
        (db, conn)
    }

    async fn post(
        conn: &mut SqliteConnection,
        date: &str,
        description: &str,
        lines: Vec<JournalLine>,
    ) -> JournalTransaction {
        post_journal(
            conn,
            &JournalDraft {
                user_id: 1,
                entry_date: date.parse().unwrap(),
                description: description.to_string(),
                strategy: None,
                trade_num: None,
                reverses_journal_id: None,
                lines,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_journal_detail_resolves_codes() {
        let (_db, mut conn) = setup().await;
        let journal = post(
            &mut conn,
            "2025-01-02",
            "deposit",
            vec![
                JournalLine::debit(chart::CASH, 100_000),
                JournalLine::credit(chart::OPENING_EQUITY, 100_000),
            ],
        )
        .await;

        let detail = journal_detail(&mut conn, 1, journal.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(detail.journal.description, "deposit");
        assert_eq!(detail.entries.len(), 2);
        assert_eq!(detail.entries[0].account_code, chart::CASH);
        assert_eq!(detail.entries[0].side, "D");
        assert_eq!(detail.entries[1].account_code, chart::OPENING_EQUITY);

        assert!(journal_detail(&mut conn, 1, 999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_account_activity_running_balance() {
        let (_db, mut conn) = setup().await;
        post(
            &mut conn,
            "2025-01-02",
            "deposit",
            vec![
                JournalLine::debit(chart::CASH, 100_000),
                JournalLine::credit(chart::OPENING_EQUITY, 100_000),
            ],
        )
        .await;
        post(
            &mut conn,
            "2025-01-05",
            "buy",
            vec![
                JournalLine::debit(chart::INVESTMENTS, 40_000),
                JournalLine::credit(chart::CASH, 40_000),
            ],
        )
        .await;

        let activity = account_activity(&mut conn, 1, chart::CASH).await.unwrap();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].balance_cents, 100_000);
        assert_eq!(activity[1].side, "C");
        assert_eq!(activity[1].balance_cents, 60_000);

        let err = account_activity(&mut conn, 1, "9999").await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount { .. }));
    }

    #[tokio::test]
    async fn test_trial_balance_sides_agree() {
        let (_db, mut conn) = setup().await;
        post(
            &mut conn,
            "2025-01-02",
            "deposit",
            vec![
                JournalLine::debit(chart::CASH, 100_000),
                JournalLine::credit(chart::OPENING_EQUITY, 100_000),
            ],
        )
        .await;
        post(
            &mut conn,
            "2025-01-05",
            "buy",
            vec![
                JournalLine::debit(chart::INVESTMENTS, 40_000),
                JournalLine::credit(chart::CASH, 40_000),
            ],
        )
        .await;

        let tb = trial_balance(&mut conn, 1).await.unwrap();
        assert!(tb.balanced);
        assert_eq!(tb.debit_total_cents, 100_000);
        assert_eq!(tb.credit_total_cents, 100_000);
        assert_eq!(tb.rows.len(), 6);

        let cash = tb.rows.iter().find(|r| r.code == chart::CASH).unwrap();
        assert_eq!(cash.settled_cents, 60_000);
    }
}
