//! Year-end summary built from the Form 8949 rows.

use ledger_core::LedgerError;
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::form8949::{generate_form_8949, HoldingPeriod};

#[derive(Debug, Default, Clone, Serialize)]
pub struct TaxBucket {
    pub proceeds_cents: i64,
    pub cost_basis_cents: i64,
    pub adjustment_cents: i64,
    pub gain_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct TaxReport {
    pub tax_year: i32,
    pub short_term: TaxBucket,
    pub long_term: TaxBucket,
    pub total: TaxBucket,
    pub wash_sale_disallowed_cents: i64,
}

pub async fn generate_tax_report(
    conn: &mut SqliteConnection,
    user_id: i64,
    tax_year: i32,
) -> Result<TaxReport, LedgerError> {
    let rows = generate_form_8949(conn, user_id, tax_year).await?;

    let mut short_term = TaxBucket::default();
    let mut long_term = TaxBucket::default();
    for row in &rows {
        let bucket = match row.holding_period {
            HoldingPeriod::ShortTerm => &mut short_term,
            HoldingPeriod::LongTerm => &mut long_term,
        };
        bucket.proceeds_cents += row.proceeds_cents;
        bucket.cost_basis_cents += row.cost_basis_cents;
        bucket.adjustment_cents += row.adjustment_cents;
        bucket.gain_cents += row.gain_loss_cents;
    }

    let total = TaxBucket {
        proceeds_cents: short_term.proceeds_cents + long_term.proceeds_cents,
        cost_basis_cents: short_term.cost_basis_cents + long_term.cost_basis_cents,
        adjustment_cents: short_term.adjustment_cents + long_term.adjustment_cents,
        gain_cents: short_term.gain_cents + long_term.gain_cents,
    };
    let wash_sale_disallowed_cents = total.adjustment_cents;

    Ok(TaxReport {
        tax_year,
        short_term,
        long_term,
        total,
        wash_sale_disallowed_cents,
    })
}
