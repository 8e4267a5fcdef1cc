//! Form 8949 rows: one per taxable disposition, wash-sale adjustments
//! carried as code "W" with the disallowed amount added back to the gain.

use chrono::NaiveDate;
use ledger_core::money::format_cents;
use ledger_core::{Instrument, LedgerError};
use serde::Serialize;
use sqlx::SqliteConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingPeriod {
    ShortTerm,
    LongTerm,
}

impl HoldingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingPeriod::ShortTerm => "short_term",
            HoldingPeriod::LongTerm => "long_term",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Form8949Row {
    pub description: String,
    pub date_acquired: NaiveDate,
    pub date_sold: NaiveDate,
    pub proceeds_cents: i64,
    pub cost_basis_cents: i64,
    pub wash_sale_code: String, // "" | "W"
    pub adjustment_cents: i64,
    pub gain_loss_cents: i64,
    pub holding_period: HoldingPeriod,
}

#[derive(Debug, sqlx::FromRow)]
struct DispositionRow {
    symbol: String,
    contract_type: Option<String>,
    strike_cents: Option<i64>,
    expiry: Option<NaiveDate>,
    open_date: NaiveDate,
    close_date: NaiveDate,
    quantity: i64,
    proceeds_cents: i64,
    basis_cents: i64,
    realized_gain_cents: i64,
    loss_disallowed: bool,
    disallowed_cents: i64,
}

/// All taxable dispositions closed in `tax_year`, oldest sale first.
/// Assignment conversions are basis transfers, not sales, and are skipped
/// while their realized gain is zero; a conversion that recognized gain
/// (writer credit past the stock's cost) is a taxable event and reports.
/// Disallowed losses keep their original proceeds and basis; the wash-sale
/// amount rides in the adjustment column and the reported gain.
pub async fn generate_form_8949(
    conn: &mut SqliteConnection,
    user_id: i64,
    tax_year: i32,
) -> Result<Vec<Form8949Row>, LedgerError> {
    let (Some(year_start), Some(year_end)) = (
        NaiveDate::from_ymd_opt(tax_year, 1, 1),
        NaiveDate::from_ymd_opt(tax_year, 12, 31),
    ) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query_as::<_, DispositionRow>(
        r#"
        SELECT l.symbol, l.contract_type, l.strike_cents, l.expiry, l.open_date,
               d.close_date, d.quantity, d.proceeds_cents, d.basis_cents,
               d.realized_gain_cents, d.loss_disallowed, d.disallowed_cents
        FROM lot_dispositions d
        JOIN stock_lots l ON l.id = d.lot_id
        WHERE d.user_id = ?
          AND (d.via_assignment = 0 OR d.realized_gain_cents != 0)
          AND d.close_date >= ? AND d.close_date <= ?
        ORDER BY d.close_date ASC, l.symbol ASC, d.id ASC
        "#,
    )
    .bind(user_id)
    .bind(year_start)
    .bind(year_end)
    .fetch_all(&mut *conn)
    .await?;

    let mut form = Vec::with_capacity(rows.len());
    for row in rows {
        let instrument = Instrument::from_columns(
            &row.symbol,
            row.contract_type.as_deref(),
            row.strike_cents,
            row.expiry,
        );
        let held_days = (row.close_date - row.open_date).num_days();
        let holding_period = if held_days > 365 {
            HoldingPeriod::LongTerm
        } else {
            HoldingPeriod::ShortTerm
        };
        let wash_sale_code = if row.loss_disallowed { "W" } else { "" };

        form.push(Form8949Row {
            description: format!("{} {}", row.quantity, instrument.describe()),
            date_acquired: row.open_date,
            date_sold: row.close_date,
            proceeds_cents: row.proceeds_cents,
            cost_basis_cents: row.basis_cents,
            wash_sale_code: wash_sale_code.to_string(),
            adjustment_cents: row.disallowed_cents,
            gain_loss_cents: row.realized_gain_cents + row.disallowed_cents,
            holding_period,
        });
    }

    Ok(form)
}

/// Serialize rows in the order given. Blank code and adjustment columns mean
/// no wash-sale adjustment applies to the row.
pub fn form_8949_csv(rows: &[Form8949Row]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "description",
        "date_acquired",
        "date_sold",
        "proceeds",
        "cost_basis",
        "wash_sale_code",
        "adjustment",
        "gain_loss",
        "holding_period",
    ])?;

    for row in rows {
        let adjustment = if row.wash_sale_code.is_empty() {
            String::new()
        } else {
            format_cents(row.adjustment_cents)
        };
        writer.write_record(&[
            row.description.clone(),
            row.date_acquired.to_string(),
            row.date_sold.to_string(),
            format_cents(row.proceeds_cents),
            format_cents(row.cost_basis_cents),
            row.wash_sale_code.clone(),
            adjustment,
            format_cents(row.gain_loss_cents),
            row.holding_period.as_str().to_string(),
        ])?;
    }

    let bytes = writer.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}


#[cfg(test)]
mod tests {
    use super::testutil::{seed_disposition, seed_option_lot, seed_share_lot};
    use super::*;
    use ledger_core::LedgerDb;

    async fn setup() -> (LedgerDb, sqlx::pool::PoolConnection<sqlx::Sqlite>) {
        let db = LedgerDb::new("sqlite::memory:").await.unwrap();
        let conn = db.pool().acquire().await.unwrap();
        (db, conn)
    }

    #[tokio::test]
    async fn test_wash_adjusted_loss_reports_code_w() {
        let (_db, mut conn) = setup().await;
        seed_share_lot(&mut conn, 1, "XYZ", "2025-03-01", 100).await;
        seed_disposition(
            &mut conn, 10, 1, "2025-03-10", 100, 450_000, 500_000, false, Some(50_000),
        )
        .await;

        let rows = generate_form_8949(&mut conn, 1, 2025).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.description, "100 XYZ");
        assert_eq!(row.wash_sale_code, "W");
        assert_eq!(row.adjustment_cents, 50_000);
        // -500.00 loss fully disallowed reports as zero
        assert_eq!(row.gain_loss_cents, 0);
        assert_eq!(row.holding_period, HoldingPeriod::ShortTerm);
    }

    #[tokio::test]
    async fn test_option_description_and_long_term() {
        let (_db, mut conn) = setup().await;
        seed_option_lot(
            &mut conn, 1, "XYZ", "put", 15_000, "2026-01-16", "2024-01-10", 2,
        )
        .await;
        seed_disposition(&mut conn, 10, 1, "2025-06-01", 2, 100_000, 60_000, false, None).await;

        let rows = generate_form_8949(&mut conn, 1, 2025).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description, "2 XYZ 2026-01-16 150.00P");
        assert_eq!(rows[0].holding_period, HoldingPeriod::LongTerm);
        assert_eq!(rows[0].wash_sale_code, "");
        assert_eq!(rows[0].gain_loss_cents, 40_000);
    }

    #[tokio::test]
    async fn test_one_year_exactly_is_short_term() {
        let (_db, mut conn) = setup().await;
        seed_share_lot(&mut conn, 1, "AAA", "2024-06-01", 10).await;
        seed_disposition(&mut conn, 10, 1, "2025-06-01", 10, 2_000, 1_000, false, None).await;
        seed_share_lot(&mut conn, 2, "BBB", "2024-06-01", 10).await;
        seed_disposition(&mut conn, 11, 2, "2025-06-02", 10, 2_000, 1_000, false, None).await;

        let rows = generate_form_8949(&mut conn, 1, 2025).await.unwrap();
        assert_eq!(rows[0].holding_period, HoldingPeriod::ShortTerm);
        assert_eq!(rows[1].holding_period, HoldingPeriod::LongTerm);
    }

    #[tokio::test]
    async fn test_assignments_and_other_years_excluded() {
        let (_db, mut conn) = setup().await;
        seed_share_lot(&mut conn, 1, "XYZ", "2024-03-01", 100).await;
        seed_disposition(&mut conn, 10, 1, "2024-12-31", 50, 10_000, 8_000, false, None).await;
        // conversion transfer: proceeds equal basis, nothing recognized
        seed_disposition(&mut conn, 11, 1, "2025-01-01", 25, 10_000, 10_000, true, None).await;
        seed_disposition(&mut conn, 12, 1, "2025-01-02", 25, 10_000, 8_000, false, None).await;

        let rows = generate_form_8949(&mut conn, 1, 2025).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date_sold.to_string(), "2025-01-02");
    }

    #[tokio::test]
    async fn test_assignment_overflow_gain_reports() {
        let (_db, mut conn) = setup().await;
        // assignment spanning two put lots: the first portion transferred at
        // basis, the last carried the writer credit left over after the
        // stock basis floored at zero
        seed_option_lot(
            &mut conn, 1, "XYZ", "put", 5_000, "2025-06-20", "2025-02-03", 1,
        )
        .await;
        seed_option_lot(
            &mut conn, 2, "XYZ", "put", 5_000, "2025-06-20", "2025-02-10", 1,
        )
        .await;
        seed_disposition(&mut conn, 10, 1, "2025-03-21", 1, 5_000, 5_000, true, None).await;
        seed_disposition(&mut conn, 11, 2, "2025-03-21", 1, 30_000, 20_000, true, None).await;

        let rows = generate_form_8949(&mut conn, 1, 2025).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.description, "1 XYZ 2025-06-20 50.00P");
        assert_eq!(row.date_acquired.to_string(), "2025-02-10");
        assert_eq!(row.gain_loss_cents, 10_000);
        assert_eq!(row.wash_sale_code, "");
        assert_eq!(row.adjustment_cents, 0);
        assert_eq!(row.holding_period, HoldingPeriod::ShortTerm);

        let report = crate::report::generate_tax_report(&mut conn, 1, 2025)
            .await
            .unwrap();
        assert_eq!(report.short_term.gain_cents, 10_000);
        assert_eq!(report.total.gain_cents, 10_000);
    }

    #[tokio::test]
    async fn test_rows_ordered_by_sale_then_symbol() {
        let (_db, mut conn) = setup().await;
        seed_share_lot(&mut conn, 1, "MMM", "2025-01-02", 10).await;
        seed_share_lot(&mut conn, 2, "AAA", "2025-01-02", 10).await;
        seed_disposition(&mut conn, 10, 1, "2025-02-10", 10, 2_000, 1_000, false, None).await;
        seed_disposition(&mut conn, 11, 2, "2025-02-10", 10, 2_000, 1_000, false, None).await;
        seed_disposition(&mut conn, 12, 2, "2025-02-01", 5, 1_000, 500, false, None).await;

        let rows = generate_form_8949(&mut conn, 1, 2025).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].date_sold.to_string(), "2025-02-01");
        assert_eq!(rows[1].description, "10 AAA");
        assert_eq!(rows[2].description, "10 MMM");
    }

    #[test]
    fn test_csv_layout_is_stable() {
        let rows = vec![
            Form8949Row {
                description: "100 XYZ".to_string(),
                date_acquired: "2025-03-01".parse().unwrap(),
                date_sold: "2025-03-10".parse().unwrap(),
                proceeds_cents: 450_000,
                cost_basis_cents: 500_000,
                wash_sale_code: "W".to_string(),
                adjustment_cents: 50_000,
                gain_loss_cents: 0,
                holding_period: HoldingPeriod::ShortTerm,
            },
            Form8949Row {
                description: "10 ABC".to_string(),
                date_acquired: "2024-01-10".parse().unwrap(),
                date_sold: "2025-06-01".parse().unwrap(),
                proceeds_cents: 100_000,
                cost_basis_cents: 60_000,
                wash_sale_code: String::new(),
                adjustment_cents: 0,
                gain_loss_cents: 40_000,
                holding_period: HoldingPeriod::LongTerm,
            },
        ];

        let csv = form_8949_csv(&rows).unwrap();
        let expected = "\
description,date_acquired,date_sold,proceeds,cost_basis,wash_sale_code,adjustment,gain_loss,holding_period
100 XYZ,2025-03-01,2025-03-10,4500.00,5000.00,W,500.00,0.00,short_term
10 ABC,2024-01-10,2025-06-01,1000.00,600.00,,,400.00,long_term
";
        assert_eq!(csv, expected);
    }

    #[test]
    fn test_csv_empty_input_is_header_only() {
        let csv = form_8949_csv(&[]).unwrap();
        assert_eq!(
            csv,
            "description,date_acquired,date_sold,proceeds,cost_basis,wash_sale_code,adjustment,gain_loss,holding_period\n"
        );
    }
}
