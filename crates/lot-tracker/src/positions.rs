//! Read-side views over lots and dispositions.

use chrono::NaiveDate;
use ledger_core::{LedgerError, StockLot};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Aggregated open holding per instrument and position type.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OpenPosition {
    pub symbol: String,
    pub contract_type: Option<String>,
    pub strike_cents: Option<i64>,
    pub expiry: Option<NaiveDate>,
    pub position_type: String,
    pub quantity: i64,
    pub cost_basis_cents: i64,
    pub lot_count: i64,
    pub first_open_date: NaiveDate,
}

/// One disposition joined to its lot, for realized P&L reporting.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RealizedPnlRow {
    pub disposition_id: i64,
    pub symbol: String,
    pub contract_type: Option<String>,
    pub strike_cents: Option<i64>,
    pub expiry: Option<NaiveDate>,
    pub position_type: String,
    pub open_date: NaiveDate,
    pub close_date: NaiveDate,
    pub quantity: i64,
    pub proceeds_cents: i64,
    pub basis_cents: i64,
    pub realized_gain_cents: i64,
    pub via_assignment: bool,
    pub loss_disallowed: bool,
    pub disallowed_cents: i64,
}

pub async fn open_positions(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Vec<OpenPosition>, LedgerError> {
    let positions = sqlx::query_as::<_, OpenPosition>(
        r#"
        SELECT symbol, contract_type, strike_cents, expiry, position_type,
               SUM(quantity_remaining) AS quantity,
               SUM(cost_basis_cents) AS cost_basis_cents,
               COUNT(*) AS lot_count,
               MIN(open_date) AS first_open_date
        FROM stock_lots
        WHERE user_id = ? AND quantity_remaining > 0
        GROUP BY symbol, contract_type, strike_cents, expiry, position_type
        ORDER BY symbol, position_type
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(positions)
}

/// Dispositions joined to their lots, oldest close first. Pass a date range
/// to narrow to one period.
pub async fn realized_pnl(
    conn: &mut SqliteConnection,
    user_id: i64,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<RealizedPnlRow>, LedgerError> {
    let rows = sqlx::query_as::<_, RealizedPnlRow>(
        r#"
        SELECT d.id AS disposition_id, l.symbol, l.contract_type, l.strike_cents,
               l.expiry, l.position_type, l.open_date, d.close_date, d.quantity,
               d.proceeds_cents, d.basis_cents, d.realized_gain_cents,
               d.via_assignment, d.loss_disallowed, d.disallowed_cents
        FROM lot_dispositions d
        JOIN stock_lots l ON l.id = d.lot_id
        WHERE d.user_id = ?
          AND (? IS NULL OR d.close_date >= ?)
          AND (? IS NULL OR d.close_date <= ?)
        ORDER BY d.close_date ASC, d.id ASC
        "#,
    )
    .bind(user_id)
    .bind(from)
    .bind(from)
    .bind(to)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

pub async fn lots_for_symbol(
    conn: &mut SqliteConnection,
    user_id: i64,
    symbol: &str,
) -> Result<Vec<StockLot>, LedgerError> {
    let lots = sqlx::query_as::<_, StockLot>(
        "SELECT * FROM stock_lots WHERE user_id = ? AND symbol = ? ORDER BY open_date ASC, id ASC",
    )
    .bind(user_id)
    .bind(symbol)
    .fetch_all(&mut *conn)
    .await?;

    Ok(lots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lots::{close_leg, open_leg};
    use ledger_core::{
        seed_default_chart, Instrument, LedgerDb, LegAction, ParseConfidence, PositionType,
        TradeLeg,
    };

    async fn setup() -> (LedgerDb, sqlx::pool::PoolConnection<sqlx::Sqlite>) {
        let db = LedgerDb::new("sqlite::memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        seed_default_chart(&mut conn, 1).await.unwrap();
        (db, conn)
    }

    fn share_leg(
        symbol: &str,
        action: LegAction,
        quantity: i64,
        price_cents: i64,
        date: &str,
    ) -> TradeLeg {
        TradeLeg {
            instrument: Instrument::shares(symbol),
            action,
            position_type: PositionType::Long,
            quantity,
            price_cents,
            fees_cents: 0,
            date: date.parse().unwrap(),
            source_txn_ids: Vec::new(),
            confidence: ParseConfidence::High,
        }
    }

    #[tokio::test]
    async fn test_open_positions_aggregate_lots() {
        let (_db, mut conn) = setup().await;

        let a = share_leg("AAPL", LegAction::Open, 100, 1000, "2025-01-02");
        let b = share_leg("AAPL", LegAction::Open, 50, 1100, "2025-01-10");
        let c = share_leg("MSFT", LegAction::Open, 10, 40000, "2025-01-05");
        open_leg(&mut conn, 1, &a, 0).await.unwrap();
        open_leg(&mut conn, 1, &b, 0).await.unwrap();
        open_leg(&mut conn, 1, &c, 0).await.unwrap();

        let positions = open_positions(&mut conn, 1).await.unwrap();
        assert_eq!(positions.len(), 2);

        let aapl = positions.iter().find(|p| p.symbol == "AAPL").unwrap();
        assert_eq!(aapl.quantity, 150);
        assert_eq!(aapl.lot_count, 2);
        assert_eq!(aapl.cost_basis_cents, 100 * 1000 + 50 * 1100);
        assert_eq!(aapl.first_open_date, "2025-01-02".parse().unwrap());
    }

    #[tokio::test]
    async fn test_lots_for_symbol_filters_and_orders_by_open_date() {
        let (_db, mut conn) = setup().await;

        // inserted newest first so insertion ids run opposite the dates
        let newer = share_leg("AAPL", LegAction::Open, 50, 1100, "2025-01-10");
        let older = share_leg("AAPL", LegAction::Open, 100, 1000, "2025-01-02");
        let other = share_leg("MSFT", LegAction::Open, 10, 40000, "2025-01-05");
        open_leg(&mut conn, 1, &newer, 0).await.unwrap();
        open_leg(&mut conn, 1, &older, 0).await.unwrap();
        open_leg(&mut conn, 1, &other, 0).await.unwrap();

        // fully close the older lot; closed lots stay in the symbol history
        let close = share_leg("AAPL", LegAction::Close, 100, 1200, "2025-02-01");
        close_leg(&mut conn, 1, &close, 0, 1).await.unwrap();

        let lots = lots_for_symbol(&mut conn, 1, "AAPL").await.unwrap();
        assert_eq!(lots.len(), 2);
        assert_eq!(lots[0].open_date, "2025-01-02".parse().unwrap());
        assert_eq!(lots[0].status, "closed");
        assert_eq!(lots[0].quantity_remaining, 0);
        assert_eq!(lots[1].open_date, "2025-01-10".parse().unwrap());
        assert_eq!(lots[1].status, "open");
        assert_eq!(lots[1].quantity_remaining, 50);
        assert!(lots[0].id.unwrap() > lots[1].id.unwrap());

        let msft = lots_for_symbol(&mut conn, 1, "MSFT").await.unwrap();
        assert_eq!(msft.len(), 1);
        assert_eq!(msft[0].symbol, "MSFT");
    }

    #[tokio::test]
    async fn test_realized_pnl_respects_date_range() {
        let (_db, mut conn) = setup().await;

        let open = share_leg("AAPL", LegAction::Open, 100, 1000, "2025-01-02");
        open_leg(&mut conn, 1, &open, 0).await.unwrap();
        let close1 = share_leg("AAPL", LegAction::Close, 40, 1200, "2025-02-01");
        close_leg(&mut conn, 1, &close1, 0, 1).await.unwrap();
        let close2 = share_leg("AAPL", LegAction::Close, 60, 900, "2025-06-01");
        close_leg(&mut conn, 1, &close2, 0, 2).await.unwrap();

        let all = realized_pnl(&mut conn, 1, None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].realized_gain_cents, 8_000);
        assert_eq!(all[1].realized_gain_cents, -6_000);

        let spring = realized_pnl(
            &mut conn,
            1,
            Some("2025-01-01".parse().unwrap()),
            Some("2025-03-01".parse().unwrap()),
        )
        .await
        .unwrap();
        assert_eq!(spring.len(), 1);
        assert_eq!(spring[0].close_date, "2025-02-01".parse().unwrap());
    }
}
