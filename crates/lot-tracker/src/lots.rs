//! Lot inventory: opens (with same-day merge), FIFO closes and the journal
//! lines each leg implies.

use chrono::NaiveDate;
use ledger_core::chart;
use ledger_core::money::prorate;
use ledger_core::{Instrument, JournalLine, LedgerError, PositionType, StockLot, TradeLeg};
use sqlx::SqliteConnection;

/// Everything one applied leg contributes to the trade's journal.
#[derive(Debug, Clone, Default)]
pub struct LegOutcome {
    pub lines: Vec<JournalLine>,
    pub realized_gain_cents: i64,
    pub opened_lot_id: Option<i64>,
    pub disposition_ids: Vec<i64>,
}

/// One matched slice of an open lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPortion {
    pub lot_id: i64,
    pub take: i64,
    pub open_cents: i64,
}

fn contract_columns(
    instrument: &Instrument,
) -> (Option<&'static str>, Option<i64>, Option<NaiveDate>) {
    match &instrument.contract {
        Some(c) => (
            Some(c.contract_type.as_str()),
            Some(c.strike_cents),
            Some(c.expiry),
        ),
        None => (None, None, None),
    }
}

/// Open lots able to absorb a close of this instrument/position, oldest first.
pub async fn fetch_open_lots(
    conn: &mut SqliteConnection,
    user_id: i64,
    instrument: &Instrument,
    position_type: PositionType,
) -> Result<Vec<StockLot>, LedgerError> {
    let (contract_type, strike_cents, expiry) = contract_columns(instrument);

    let lots = sqlx::query_as::<_, StockLot>(
        r#"
        SELECT * FROM stock_lots
        WHERE user_id = ? AND symbol = ? AND position_type = ?
          AND contract_type IS ? AND strike_cents IS ? AND expiry IS ?
          AND quantity_remaining > 0
        ORDER BY open_date ASC, id ASC
        "#,
    )
    .bind(user_id)
    .bind(&instrument.symbol)
    .bind(position_type.as_str())
    .bind(contract_type)
    .bind(strike_cents)
    .bind(expiry)
    .fetch_all(&mut *conn)
    .await?;

    Ok(lots)
}

/// Allocate `quantity` across open lots oldest-first. A fully consumed lot
/// gives up its exact remaining basis, so nothing is lost to rounding.
/// Callers check total availability beforehand.
pub fn plan_fifo(lots: &[StockLot], quantity: i64) -> Vec<FifoPortion> {
    let mut portions = Vec::new();
    let mut qty_left = quantity;

    for lot in lots {
        if qty_left == 0 {
            break;
        }
        let Some(lot_id) = lot.id else { continue };
        let take = qty_left.min(lot.quantity_remaining);
        let open_cents = if take == lot.quantity_remaining {
            lot.cost_basis_cents
        } else {
            prorate(lot.cost_basis_cents, take, lot.quantity_remaining)
        };
        portions.push(FifoPortion {
            lot_id,
            take,
            open_cents,
        });
        qty_left -= take;
    }

    portions
}

/// Open a lot (or increment a same-day same-price open lot). Long opens
/// capitalize fees into basis; short opens net fees out of the credit.
pub async fn open_leg(
    conn: &mut SqliteConnection,
    user_id: i64,
    leg: &TradeLeg,
    leg_index: usize,
) -> Result<LegOutcome, LedgerError> {
    let gross = leg.price_cents * leg.quantity;

    let (basis_cents, lines) = match leg.position_type {
        PositionType::Long => {
            let basis = gross + leg.fees_cents;
            if basis <= 0 {
                return Err(LedgerError::InvalidLeg {
                    leg_index,
                    reason: "open has no cost".to_string(),
                });
            }
            (
                basis,
                vec![
                    JournalLine::debit(chart::INVESTMENTS, basis),
                    JournalLine::credit(chart::CASH, basis),
                ],
            )
        }
        PositionType::Short => {
            let credit = gross - leg.fees_cents;
            if credit <= 0 {
                return Err(LedgerError::InvalidLeg {
                    leg_index,
                    reason: "fees exceed premium received".to_string(),
                });
            }
            (
                credit,
                vec![
                    JournalLine::debit(chart::CASH, credit),
                    JournalLine::credit(chart::SHORT_PREMIUM, credit),
                ],
            )
        }
    };

    let lot_id = upsert_lot(conn, user_id, leg, basis_cents).await?;

    Ok(LegOutcome {
        lines,
        realized_gain_cents: 0,
        opened_lot_id: Some(lot_id),
        disposition_ids: Vec::new(),
    })
}

/// Close `leg.quantity` against open lots, oldest first, possibly spanning
/// several. Writes one disposition per matched portion and returns the leg's
/// journal lines. Fees reduce proceeds on long closes and gross up the cost
/// on short closes.
pub async fn close_leg(
    conn: &mut SqliteConnection,
    user_id: i64,
    leg: &TradeLeg,
    leg_index: usize,
    journal_id: i64,
) -> Result<LegOutcome, LedgerError> {
    let lots = fetch_open_lots(conn, user_id, &leg.instrument, leg.position_type).await?;
    if lots.is_empty() {
        return Err(LedgerError::OrphanLeg {
            leg_index,
            instrument: leg.instrument.describe(),
            position_type: leg.position_type.as_str().to_string(),
        });
    }

    let available: i64 = lots.iter().map(|l| l.quantity_remaining).sum();
    if available < leg.quantity {
        return Err(LedgerError::NegativeQuantity {
            leg_index,
            instrument: leg.instrument.describe(),
            requested: leg.quantity,
            available,
        });
    }

    let gross = leg.price_cents * leg.quantity;
    let close_total = match leg.position_type {
        PositionType::Long => gross - leg.fees_cents,
        PositionType::Short => gross + leg.fees_cents,
    };
    if close_total < 0 {
        return Err(LedgerError::InvalidLeg {
            leg_index,
            reason: "fees exceed sale proceeds".to_string(),
        });
    }

    let portions = plan_fifo(&lots, leg.quantity);

    let mut outcome = LegOutcome::default();
    let mut open_allocated = 0i64;
    let mut close_allocated = 0i64;

    for (idx, portion) in portions.iter().enumerate() {
        // The last portion absorbs the allocation remainder so the portions
        // sum exactly to the close total.
        let close_cents = if idx + 1 == portions.len() {
            close_total - close_allocated
        } else {
            prorate(close_total, portion.take, leg.quantity)
        };
        open_allocated += portion.open_cents;
        close_allocated += close_cents;

        let (proceeds_cents, basis_cents) = match leg.position_type {
            PositionType::Long => (close_cents, portion.open_cents),
            PositionType::Short => (portion.open_cents, close_cents),
        };
        let realized = proceeds_cents - basis_cents;
        outcome.realized_gain_cents += realized;

        apply_lot_close(conn, portion).await?;
        let disposition_id = insert_disposition(
            conn,
            user_id,
            journal_id,
            &DispositionDraft {
                lot_id: portion.lot_id,
                close_date: leg.date,
                quantity: portion.take,
                proceeds_cents,
                basis_cents,
                realized_gain_cents: realized,
                via_assignment: false,
            },
        )
        .await?;
        outcome.disposition_ids.push(disposition_id);
    }

    outcome.lines = close_lines(leg, gross, open_allocated);
    Ok(outcome)
}

/// Journal lines for a close. The realized line carries the gross gain so
/// ledger net income (gain minus the fee expense) equals the tax figure.
fn close_lines(leg: &TradeLeg, gross: i64, open_allocated: i64) -> Vec<JournalLine> {
    let mut lines = Vec::new();

    match leg.position_type {
        PositionType::Long => {
            let net = gross - leg.fees_cents;
            if net > 0 {
                lines.push(JournalLine::debit(chart::CASH, net));
            }
            if leg.fees_cents > 0 {
                lines.push(JournalLine::debit(chart::TRADING_FEES, leg.fees_cents));
            }
            if open_allocated > 0 {
                lines.push(JournalLine::credit(chart::INVESTMENTS, open_allocated));
            }
            let gain = gross - open_allocated;
            if gain > 0 {
                lines.push(JournalLine::credit(chart::REALIZED_GAINS, gain));
            } else if gain < 0 {
                lines.push(JournalLine::debit(chart::REALIZED_GAINS, -gain));
            }
        }
        PositionType::Short => {
            if open_allocated > 0 {
                lines.push(JournalLine::debit(chart::SHORT_PREMIUM, open_allocated));
            }
            if leg.fees_cents > 0 {
                lines.push(JournalLine::debit(chart::TRADING_FEES, leg.fees_cents));
            }
            let cash_out = gross + leg.fees_cents;
            if cash_out > 0 {
                lines.push(JournalLine::credit(chart::CASH, cash_out));
            }
            let gain = open_allocated - gross;
            if gain > 0 {
                lines.push(JournalLine::credit(chart::REALIZED_GAINS, gain));
            } else if gain < 0 {
                lines.push(JournalLine::debit(chart::REALIZED_GAINS, -gain));
            }
        }
    }

    lines
}

pub(crate) async fn upsert_lot(
    conn: &mut SqliteConnection,
    user_id: i64,
    leg: &TradeLeg,
    basis_cents: i64,
) -> Result<i64, LedgerError> {
    let (contract_type, strike_cents, expiry) = contract_columns(&leg.instrument);

    // Partial fills of one order arrive as identical rows; anything else
    // (different day, price, or an already-touched lot) opens a new lot so
    // acquired dates and per-unit basis stay exact.
    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM stock_lots
        WHERE user_id = ? AND symbol = ? AND position_type = ?
          AND contract_type IS ? AND strike_cents IS ? AND expiry IS ?
          AND open_date = ? AND open_price_cents = ? AND status = 'open'
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(&leg.instrument.symbol)
    .bind(leg.position_type.as_str())
    .bind(contract_type)
    .bind(strike_cents)
    .bind(expiry)
    .bind(leg.date)
    .bind(leg.price_cents)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((lot_id,)) = existing {
        sqlx::query(
            r#"
            UPDATE stock_lots
            SET original_quantity = original_quantity + ?,
                quantity_remaining = quantity_remaining + ?,
                cost_basis_cents = cost_basis_cents + ?
            WHERE id = ?
            "#,
        )
        .bind(leg.quantity)
        .bind(leg.quantity)
        .bind(basis_cents)
        .bind(lot_id)
        .execute(&mut *conn)
        .await?;

        return Ok(lot_id);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO stock_lots (user_id, symbol, contract_type, strike_cents, expiry,
                                position_type, open_date, original_quantity,
                                quantity_remaining, open_price_cents, cost_basis_cents, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'open')
        "#,
    )
    .bind(user_id)
    .bind(&leg.instrument.symbol)
    .bind(contract_type)
    .bind(strike_cents)
    .bind(expiry)
    .bind(leg.position_type.as_str())
    .bind(leg.date)
    .bind(leg.quantity)
    .bind(leg.quantity)
    .bind(leg.price_cents)
    .bind(basis_cents)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub(crate) async fn apply_lot_close(
    conn: &mut SqliteConnection,
    portion: &FifoPortion,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE stock_lots
        SET quantity_remaining = quantity_remaining - ?,
            cost_basis_cents = cost_basis_cents - ?,
            status = CASE WHEN quantity_remaining - ? = 0 THEN 'closed' ELSE 'partially_closed' END
        WHERE id = ?
        "#,
    )
    .bind(portion.take)
    .bind(portion.open_cents)
    .bind(portion.take)
    .bind(portion.lot_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// A disposition row ready to insert once the journal id is known.
#[derive(Debug, Clone)]
pub(crate) struct DispositionDraft {
    pub lot_id: i64,
    pub close_date: NaiveDate,
    pub quantity: i64,
    pub proceeds_cents: i64,
    pub basis_cents: i64,
    pub realized_gain_cents: i64,
    pub via_assignment: bool,
}

pub(crate) async fn insert_disposition(
    conn: &mut SqliteConnection,
    user_id: i64,
    journal_id: i64,
    draft: &DispositionDraft,
) -> Result<i64, LedgerError> {
    let result = sqlx::query(
        r#"
        INSERT INTO lot_dispositions (user_id, lot_id, journal_id, close_date, quantity,
                                      proceeds_cents, basis_cents, realized_gain_cents,
                                      via_assignment)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(draft.lot_id)
    .bind(journal_id)
    .bind(draft.close_date)
    .bind(draft.quantity)
    .bind(draft.proceeds_cents)
    .bind(draft.basis_cents)
    .bind(draft.realized_gain_cents)
    .bind(draft.via_assignment)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}
