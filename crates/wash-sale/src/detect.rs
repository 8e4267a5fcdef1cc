//! Wash-sale detection: realized losses with a repurchase of the same symbol
//! inside the 61-day window around the sale.

use chrono::{Duration, NaiveDate};
use ledger_core::money::prorate;
use ledger_core::LedgerError;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeSet;

/// One loss disposition matched to its replacement opening.
#[derive(Debug, Clone, Serialize)]
pub struct WashSaleViolation {
    pub disposition_id: i64,
    pub replacement_lot_id: i64,
    pub symbol: String,
    pub sale_date: NaiveDate,
    pub replacement_open_date: NaiveDate,
    pub quantity_sold: i64,
    pub replacement_quantity: i64,
    pub loss_cents: i64,
    pub disallowed_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct WashSaleSummary {
    pub total_disallowed_cents: i64,
    pub symbols_affected: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WashSaleReport {
    pub violations: Vec<WashSaleViolation>,
    pub summary: WashSaleSummary,
}

#[derive(Debug, sqlx::FromRow)]
struct LossRow {
    disposition_id: i64,
    lot_id: i64,
    close_date: NaiveDate,
    quantity: i64,
    realized_gain_cents: i64,
    symbol: String,
}

/// Scan the user's dispositions for wash sales. A loss washes when any lot of
/// the same symbol (shares or any option on it) opened within 30 days either
/// side of the sale; the earliest such opening is the replacement. Already
/// flagged and assignment dispositions are skipped, which is what makes a
/// re-run after `apply_wash_sale_adjustments` come back clean.
pub async fn detect_wash_sales(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<WashSaleReport, LedgerError> {
    let losses = sqlx::query_as::<_, LossRow>(
        r#"
        SELECT d.id AS disposition_id, d.lot_id, d.close_date, d.quantity,
               d.realized_gain_cents, l.symbol
        FROM lot_dispositions d
        JOIN stock_lots l ON l.id = d.lot_id
        WHERE d.user_id = ?
          AND d.realized_gain_cents < 0
          AND d.loss_disallowed = 0
          AND d.via_assignment = 0
        ORDER BY d.close_date ASC, d.id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut violations = Vec::new();
    for loss in losses {
        let window_start = loss.close_date - Duration::days(30);
        let window_end = loss.close_date + Duration::days(30);

        let replacement: Option<(i64, NaiveDate, i64)> = sqlx::query_as(
            r#"
            SELECT id, open_date, original_quantity
            FROM stock_lots
            WHERE user_id = ? AND symbol = ? AND id != ?
              AND original_quantity > 0
              AND open_date >= ? AND open_date <= ?
            ORDER BY open_date ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(&loss.symbol)
        .bind(loss.lot_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_optional(&mut *conn)
        .await?;

        let Some((replacement_lot_id, replacement_open_date, replacement_quantity)) = replacement
        else {
            continue;
        };

        let loss_cents = -loss.realized_gain_cents;
        let matched = loss.quantity.min(replacement_quantity);
        let disallowed_cents = prorate(loss_cents, matched, loss.quantity);

        violations.push(WashSaleViolation {
            disposition_id: loss.disposition_id,
            replacement_lot_id,
            symbol: loss.symbol,
            sale_date: loss.close_date,
            replacement_open_date,
            quantity_sold: loss.quantity,
            replacement_quantity,
            loss_cents,
            disallowed_cents,
        });
    }

    let total_disallowed_cents = violations.iter().map(|v| v.disallowed_cents).sum();
    let symbols: BTreeSet<String> = violations.iter().map(|v| v.symbol.clone()).collect();

    Ok(WashSaleReport {
        violations,
        summary: WashSaleSummary {
            total_disallowed_cents,
            symbols_affected: symbols.into_iter().collect(),
        },
    })
}


#[cfg(test)]
mod tests {
    use super::testutil::{seed_disposition, seed_lot};
    use super::*;
    use ledger_core::LedgerDb;

    async fn setup() -> (LedgerDb, sqlx::pool::PoolConnection<sqlx::Sqlite>) {
        let db = LedgerDb::new("sqlite::memory:").await.unwrap();
        let conn = db.pool().acquire().await.unwrap();
        (db, conn)
    }

    #[tokio::test]
    async fn test_repurchase_two_days_later_washes_full_loss() {
        let (_db, mut conn) = setup().await;
        // buy 100 @ $50, sell all @ $45, buy 100 @ $48 two days later
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 450_000, 500_000, false).await;
        seed_lot(&mut conn, 2, "XYZ", "2025-03-12", 100, 100, 480_000, "open").await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert_eq!(report.violations.len(), 1);
        let v = &report.violations[0];
        assert_eq!(v.disposition_id, 10);
        assert_eq!(v.replacement_lot_id, 2);
        assert_eq!(v.loss_cents, 50_000);
        assert_eq!(v.disallowed_cents, 50_000);
        assert_eq!(report.summary.total_disallowed_cents, 50_000);
        assert_eq!(report.summary.symbols_affected, vec!["XYZ".to_string()]);
    }

    #[tokio::test]
    async fn test_partial_replacement_prorates_disallowance() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 490_000, 500_000, false).await;
        seed_lot(&mut conn, 2, "XYZ", "2025-03-20", 40, 40, 200_000, "open").await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert_eq!(report.violations.len(), 1);
        // 40 of the 100 lost shares were replaced
        assert_eq!(report.violations[0].disallowed_cents, 4_000);
    }

    #[tokio::test]
    async fn test_window_boundaries() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "AAA", "2025-01-02", 10, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-31", 10, 1_000, 2_000, false).await;

        // 31 days out on both sides: no wash
        seed_lot(&mut conn, 2, "AAA", "2025-02-28", 10, 10, 1_000, "open").await;
        seed_lot(&mut conn, 3, "AAA", "2025-05-01", 10, 10, 1_000, "open").await;
        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert!(report.violations.is_empty());

        // exactly 30 days before the sale: washes
        seed_lot(&mut conn, 4, "AAA", "2025-03-01", 10, 10, 1_000, "open").await;
        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].replacement_lot_id, 4);
    }

    #[tokio::test]
    async fn test_earliest_qualifying_opening_wins() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 400_000, 500_000, false).await;
        seed_lot(&mut conn, 2, "XYZ", "2025-03-25", 100, 100, 480_000, "open").await;
        seed_lot(&mut conn, 3, "XYZ", "2025-03-12", 100, 100, 470_000, "open").await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert_eq!(report.violations[0].replacement_lot_id, 3);
    }

    #[tokio::test]
    async fn test_disposed_lot_is_not_its_own_replacement() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 400_000, 500_000, false).await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert!(report.violations.is_empty());
    }

    #[tokio::test]
    async fn test_gains_and_assignment_dispositions_skipped() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_lot(&mut conn, 2, "XYZ", "2025-03-12", 100, 100, 480_000, "open").await;
        // a gain
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 50, 300_000, 250_000, false).await;
        // a loss, but through assignment
        seed_disposition(&mut conn, 11, 1, "2025-03-10", 50, 200_000, 250_000, true).await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert!(report.violations.is_empty());
    }

    #[tokio::test]
    async fn test_option_lot_washes_share_loss() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 400_000, 500_000, false).await;
        // a call on the same symbol opened inside the window
        sqlx::query(
            r#"
            INSERT INTO stock_lots (id, user_id, symbol, contract_type, strike_cents, expiry,
                                    position_type, open_date, original_quantity,
                                    quantity_remaining, open_price_cents, cost_basis_cents, status)
            VALUES (2, 1, 'XYZ', 'call', 50000, '2025-06-20', 'long', '2025-03-15', 1, 1, 500, 500, 'open')
            "#,
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].replacement_lot_id, 2);
    }
}
