//! Assignment and exercise: an option lot converts into a share lot in one
//! balanced entry, with no gain realized at conversion.

use ledger_core::chart;
use ledger_core::{ContractType, JournalLine, LedgerError, PositionType, TradeLeg};
use sqlx::SqliteConnection;

use crate::lots::{
    apply_lot_close, fetch_open_lots, insert_disposition, plan_fifo, upsert_lot, DispositionDraft,
    LegOutcome,
};

/// Convert an option position into shares. The option lot is fully consumed
/// and its remaining basis moves into the share lot: added for a holder
/// exercising a call, subtracted for a writer assigned on a put. A writer
/// credit larger than the share cost floors the basis at zero and books the
/// excess as realized gain so the entry still balances.
///
/// Returns the (option leg, stock leg) outcomes; all journal lines ride on
/// the option side.
pub async fn convert_assignment(
    conn: &mut SqliteConnection,
    user_id: i64,
    option_leg: &TradeLeg,
    option_leg_index: usize,
    stock_leg: &TradeLeg,
    stock_leg_index: usize,
    journal_id: i64,
) -> Result<(LegOutcome, LegOutcome), LedgerError> {
    let Some(contract) = option_leg.instrument.contract else {
        return Err(LedgerError::InvalidLeg {
            leg_index: option_leg_index,
            reason: "assignment requires an option leg".to_string(),
        });
    };
    if stock_leg.instrument.is_option() {
        return Err(LedgerError::InvalidLeg {
            leg_index: stock_leg_index,
            reason: "conversion target must be shares".to_string(),
        });
    }
    if stock_leg.instrument.symbol != option_leg.instrument.symbol {
        return Err(LedgerError::InvalidLeg {
            leg_index: stock_leg_index,
            reason: "conversion legs reference different underlyings".to_string(),
        });
    }
    if stock_leg.position_type != PositionType::Long {
        return Err(LedgerError::InvalidLeg {
            leg_index: stock_leg_index,
            reason: "conversion must receive shares long".to_string(),
        });
    }
    if stock_leg.quantity != option_leg.quantity {
        return Err(LedgerError::InvalidLeg {
            leg_index: stock_leg_index,
            reason: "conversion quantities must match".to_string(),
        });
    }

    // Only share-receiving conversions happen here; called-away or put stock
    // arrives as an explicit close leg instead.
    let holder = match (option_leg.position_type, contract.contract_type) {
        (PositionType::Long, ContractType::Call) => true,
        (PositionType::Short, ContractType::Put) => false,
        _ => {
            return Err(LedgerError::InvalidLeg {
                leg_index: option_leg_index,
                reason: "only long-call exercise and short-put assignment receive shares"
                    .to_string(),
            })
        }
    };

    let lots = fetch_open_lots(
        conn,
        user_id,
        &option_leg.instrument,
        option_leg.position_type,
    )
    .await?;
    if lots.is_empty() {
        return Err(LedgerError::OrphanLeg {
            leg_index: option_leg_index,
            instrument: option_leg.instrument.describe(),
            position_type: option_leg.position_type.as_str().to_string(),
        });
    }
    let available: i64 = lots.iter().map(|l| l.quantity_remaining).sum();
    if available < option_leg.quantity {
        return Err(LedgerError::NegativeQuantity {
            leg_index: option_leg_index,
            instrument: option_leg.instrument.describe(),
            requested: option_leg.quantity,
            available,
        });
    }
    if available > option_leg.quantity {
        return Err(LedgerError::InvalidLeg {
            leg_index: option_leg_index,
            reason: format!(
                "assignment must consume the entire open option quantity ({available} open)"
            ),
        });
    }

    let stock_cost = stock_leg.price_cents * stock_leg.quantity + stock_leg.fees_cents;
    let portions = plan_fifo(&lots, option_leg.quantity);
    let option_open_cents: i64 = portions.iter().map(|p| p.open_cents).sum();

    let (stock_basis, overflow_gain) = if holder {
        (stock_cost + option_open_cents, 0)
    } else {
        (
            (stock_cost - option_open_cents).max(0),
            (option_open_cents - stock_cost).max(0),
        )
    };

    let mut option_outcome = LegOutcome::default();
    for (idx, portion) in portions.iter().enumerate() {
        // Any writer overflow lands on the final portion so the dispositions
        // sum to exactly what the journal books.
        let realized = if idx + 1 == portions.len() {
            overflow_gain
        } else {
            0
        };
        apply_lot_close(conn, portion).await?;
        let disposition_id = insert_disposition(
            conn,
            user_id,
            journal_id,
            &DispositionDraft {
                lot_id: portion.lot_id,
                close_date: option_leg.date,
                quantity: portion.take,
                proceeds_cents: portion.open_cents,
                basis_cents: portion.open_cents - realized,
                realized_gain_cents: realized,
                via_assignment: true,
            },
        )
        .await?;
        option_outcome.disposition_ids.push(disposition_id);
        option_outcome.realized_gain_cents += realized;
    }

    let mut lines = Vec::new();
    if stock_cost > 0 {
        lines.push(JournalLine::credit(chart::CASH, stock_cost));
    }
    if holder {
        // the option's basis already sits in the investments account and
        // simply rides into the share lot
        if stock_cost > 0 {
            lines.push(JournalLine::debit(chart::INVESTMENTS, stock_cost));
        }
    } else {
        if option_open_cents > 0 {
            lines.push(JournalLine::debit(chart::SHORT_PREMIUM, option_open_cents));
        }
        if stock_basis > 0 {
            lines.push(JournalLine::debit(chart::INVESTMENTS, stock_basis));
        }
        if overflow_gain > 0 {
            lines.push(JournalLine::credit(chart::REALIZED_GAINS, overflow_gain));
        }
    }
    option_outcome.lines = lines;

    let stock_lot_id = upsert_lot(conn, user_id, stock_leg, stock_basis).await?;
    let stock_outcome = LegOutcome {
        lines: Vec::new(),
        realized_gain_cents: 0,
        opened_lot_id: Some(stock_lot_id),
        disposition_ids: Vec::new(),
    };

    Ok((option_outcome, stock_outcome))
}
