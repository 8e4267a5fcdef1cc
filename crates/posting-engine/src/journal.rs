//! Journal posting primitives: validation, entry rows and version-checked
//! balance updates. All writes happen in the caller's transaction.

use chrono::{NaiveDate, Utc};
use ledger_core::{Account, JournalLine, JournalTransaction, LedgerError};
use sqlx::SqliteConnection;
use std::collections::HashMap;

/// A journal ready to post: metadata plus its balanced lines.
#[derive(Debug, Clone)]
pub struct JournalDraft {
    pub user_id: i64,
    pub entry_date: NaiveDate,
    pub description: String,
    pub strategy: Option<String>,
    pub trade_num: Option<i64>,
    pub reverses_journal_id: Option<i64>,
    pub lines: Vec<JournalLine>,
}

/// Lines resolved against the user's chart, ready to apply.
#[derive(Debug)]
pub struct LinePlan {
    entries: Vec<(i64, &'static str, i64)>,
    deltas: Vec<(i64, i64, i64)>, // account id, expected version, signed delta
}

/// Check that a line set forms a balanced entry: two or more lines, every
/// amount positive, every code in the user's chart, debits equal to credits.
/// Returns the per-account plan without writing anything.
pub async fn validate_lines(
    conn: &mut SqliteConnection,
    user_id: i64,
    lines: &[JournalLine],
) -> Result<LinePlan, LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::InvalidLeg {
            leg_index: 0,
            reason: "a journal entry needs at least two lines".to_string(),
        });
    }

    let mut debits = 0i64;
    let mut credits = 0i64;
    for (i, line) in lines.iter().enumerate() {
        if line.amount_cents <= 0 {
            return Err(LedgerError::InvalidLeg {
                leg_index: i,
                reason: "line amount must be positive".to_string(),
            });
        }
        match line.side {
            ledger_core::EntrySide::Debit => debits += line.amount_cents,
            ledger_core::EntrySide::Credit => credits += line.amount_cents,
        }
    }
    if debits != credits {
        return Err(LedgerError::UnbalancedEntry {
            debits_cents: debits,
            credits_cents: credits,
        });
    }

    let mut accounts: HashMap<String, Account> = HashMap::new();
    for line in lines {
        if accounts.contains_key(&line.account_code) {
            continue;
        }
        let account =
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = ? AND code = ?")
                .bind(user_id)
                .bind(&line.account_code)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| LedgerError::UnknownAccount {
                    user_id,
                    code: line.account_code.clone(),
                })?;
        accounts.insert(line.account_code.clone(), account);
    }

    let mut entries = Vec::new();
    let mut delta_map: HashMap<i64, (i64, i64)> = HashMap::new();
    for line in lines {
        let account = &accounts[&line.account_code];
        let Some(account_id) = account.id else { continue };
        entries.push((account_id, line.side.as_str(), line.amount_cents));

        // An entry on the account's normal side grows its balance.
        let delta = if line.side.as_str() == account.normal_side {
            line.amount_cents
        } else {
            -line.amount_cents
        };
        let slot = delta_map.entry(account_id).or_insert((account.version, 0));
        slot.1 += delta;
    }

    let mut deltas: Vec<(i64, i64, i64)> = delta_map
        .into_iter()
        .map(|(id, (version, delta))| (id, version, delta))
        .collect();
    deltas.sort_by_key(|d| d.0);

    Ok(LinePlan { entries, deltas })
}

/// Write the entry rows and bump each touched account's settled balance.
/// A version mismatch means another writer got there first; the caller rolls
/// the transaction back and retries.
pub async fn apply_lines(
    conn: &mut SqliteConnection,
    journal_id: i64,
    plan: &LinePlan,
) -> Result<(), LedgerError> {
    for (account_id, side, amount_cents) in &plan.entries {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (journal_id, account_id, side, amount_cents)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(journal_id)
        .bind(account_id)
        .bind(side)
        .bind(amount_cents)
        .execute(&mut *conn)
        .await?;
    }

    for (account_id, version, delta) in &plan.deltas {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET settled_cents = settled_cents + ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(delta)
        .bind(account_id)
        .bind(version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::VersionConflict {
                account_id: *account_id,
            });
        }
    }

    Ok(())
}

pub async fn insert_journal_row(
    conn: &mut SqliteConnection,
    draft: &JournalDraft,
) -> Result<JournalTransaction, LedgerError> {
    let posted_at = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO journal_transactions (user_id, entry_date, description, strategy,
                                          trade_num, reverses_journal_id, posted_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(draft.user_id)
    .bind(draft.entry_date)
    .bind(&draft.description)
    .bind(&draft.strategy)
    .bind(draft.trade_num)
    .bind(draft.reverses_journal_id)
    .bind(posted_at)
    .execute(&mut *conn)
    .await?;

    Ok(JournalTransaction {
        id: Some(result.last_insert_rowid()),
        user_id: draft.user_id,
        entry_date: draft.entry_date,
        description: draft.description.clone(),
        strategy: draft.strategy.clone(),
        trade_num: draft.trade_num,
        reverses_journal_id: draft.reverses_journal_id,
        posted_at,
    })
}

/// Validate, insert the journal row, then apply the lines.
pub async fn post_journal(
    conn: &mut SqliteConnection,
    draft: &JournalDraft,
) -> Result<JournalTransaction, LedgerError> {
    let plan = validate_lines(conn, draft.user_id, &draft.lines).await?;
    let journal = insert_journal_row(conn, draft).await?;
    let Some(journal_id) = journal.id else {
        return Err(LedgerError::Database(sqlx::Error::RowNotFound));
    };
    apply_lines(conn, journal_id, &plan).await?;
    Ok(journal)
}
