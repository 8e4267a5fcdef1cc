//! Applying wash-sale adjustments: flag the loss disposition and move the
//! disallowed amount into the replacement lot's basis.

use ledger_core::LedgerError;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::warn;

use crate::detect::WashSaleViolation;

#[derive(Debug, Default, Serialize)]
pub struct WashSaleAdjustmentOutcome {
    pub applied: usize,
    pub failed: usize,
    pub total_disallowed_cents: i64,
    pub failures: Vec<String>,
}

/// Apply each violation independently. One bad violation does not stop the
/// rest; its failure is collected in the outcome for manual follow-up.
pub async fn apply_wash_sale_adjustments(
    conn: &mut SqliteConnection,
    user_id: i64,
    violations: &[WashSaleViolation],
) -> Result<WashSaleAdjustmentOutcome, LedgerError> {
    let mut outcome = WashSaleAdjustmentOutcome::default();

    for violation in violations {
        match apply_one(conn, user_id, violation).await {
            Ok(()) => {
                outcome.applied += 1;
                outcome.total_disallowed_cents += violation.disallowed_cents;
            }
            Err(e) => {
                warn!(
                    "Wash sale adjustment failed for disposition {}: {}",
                    violation.disposition_id, e
                );
                outcome.failed += 1;
                outcome
                    .failures
                    .push(format!("disposition {}: {}", violation.disposition_id, e));
            }
        }
    }

    Ok(outcome)
}

/// Flag the disposition before touching the lot. A flagged disposition drops
/// out of detection, so a partial failure here can never double-add basis on
/// a later run; the recorded replacement id says where the basis belongs.
async fn apply_one(
    conn: &mut SqliteConnection,
    user_id: i64,
    violation: &WashSaleViolation,
) -> Result<(), LedgerError> {
    let flagged = sqlx::query(
        r#"
        UPDATE lot_dispositions
        SET loss_disallowed = 1, disallowed_cents = ?, replacement_lot_id = ?
        WHERE id = ? AND user_id = ? AND loss_disallowed = 0
        "#,
    )
    .bind(violation.disallowed_cents)
    .bind(violation.replacement_lot_id)
    .bind(violation.disposition_id)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    if flagged.rows_affected() == 0 {
        return Err(LedgerError::WashSaleAdjustment(format!(
            "disposition {} missing or already adjusted",
            violation.disposition_id
        )));
    }

    let adjusted = sqlx::query(
        "UPDATE stock_lots SET cost_basis_cents = cost_basis_cents + ? WHERE id = ? AND user_id = ?",
    )
    .bind(violation.disallowed_cents)
    .bind(violation.replacement_lot_id)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    if adjusted.rows_affected() == 0 {
        return Err(LedgerError::WashSaleAdjustment(format!(
            "replacement lot {} missing",
            violation.replacement_lot_id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testutil::{seed_disposition, seed_lot};
    use crate::detect::detect_wash_sales;
    use ledger_core::LedgerDb;

    async fn setup() -> (LedgerDb, sqlx::pool::PoolConnection<sqlx::Sqlite>) {
        let db = LedgerDb::new("sqlite::memory:").await.unwrap();
        let conn = db.pool().acquire().await.unwrap();
        (db, conn)
    }

    #[tokio::test]
    async fn test_apply_moves_loss_into_replacement_basis() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 450_000, 500_000, false).await;
        seed_lot(&mut conn, 2, "XYZ", "2025-03-12", 100, 100, 480_000, "open").await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        let outcome = apply_wash_sale_adjustments(&mut conn, 1, &report.violations)
            .await
            .unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.total_disallowed_cents, 50_000);

        let (disallowed, disallowed_cents, replacement): (bool, i64, Option<i64>) =
            sqlx::query_as(
                "SELECT loss_disallowed, disallowed_cents, replacement_lot_id FROM lot_dispositions WHERE id = 10",
            )
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert!(disallowed);
        assert_eq!(disallowed_cents, 50_000);
        assert_eq!(replacement, Some(2));

        let (basis,): (i64,) =
            sqlx::query_as("SELECT cost_basis_cents FROM stock_lots WHERE id = 2")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(basis, 530_000);

        // the flagged disposition no longer detects
        let rerun = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert!(rerun.violations.is_empty());
    }

    #[tokio::test]
    async fn test_second_apply_is_rejected_per_item() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 450_000, 500_000, false).await;
        seed_lot(&mut conn, 2, "XYZ", "2025-03-12", 100, 100, 480_000, "open").await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        apply_wash_sale_adjustments(&mut conn, 1, &report.violations)
            .await
            .unwrap();
        let second = apply_wash_sale_adjustments(&mut conn, 1, &report.violations)
            .await
            .unwrap();

        assert_eq!(second.applied, 0);
        assert_eq!(second.failed, 1);
        assert_eq!(second.failures.len(), 1);

        // basis untouched by the rejected second pass
        let (basis,): (i64,) =
            sqlx::query_as("SELECT cost_basis_cents FROM stock_lots WHERE id = 2")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(basis, 530_000);
    }

    #[tokio::test]
    async fn test_missing_replacement_lot_is_collected_not_fatal() {
        let (_db, mut conn) = setup().await;
        seed_lot(&mut conn, 1, "XYZ", "2025-03-01", 100, 0, 0, "closed").await;
        seed_disposition(&mut conn, 10, 1, "2025-03-10", 100, 450_000, 500_000, false).await;
        seed_lot(&mut conn, 2, "XYZ", "2025-03-12", 100, 100, 480_000, "open").await;
        seed_lot(&mut conn, 3, "ABC", "2025-03-01", 10, 0, 0, "closed").await;
        seed_disposition(&mut conn, 11, 3, "2025-03-05", 10, 40_000, 50_000, false).await;
        seed_lot(&mut conn, 4, "ABC", "2025-03-06", 10, 10, 45_000, "open").await;

        let report = detect_wash_sales(&mut conn, 1).await.unwrap();
        assert_eq!(report.violations.len(), 2);

        let mut violations = report.violations.clone();
        for v in &mut violations {
            if v.symbol == "ABC" {
                v.replacement_lot_id = 999;
            }
        }

        let outcome = apply_wash_sale_adjustments(&mut conn, 1, &violations)
            .await
            .unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.failures[0].contains("999"));
    }
}
