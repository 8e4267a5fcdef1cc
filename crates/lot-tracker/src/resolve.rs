//! Turns the legs of one trade into lot effects and a single set of journal
//! lines, in date order then supplied order.

use ledger_core::{JournalLine, LedgerError, LegAction, TradeLeg};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::assignment::convert_assignment;
use crate::lots::{close_leg, open_leg, LegOutcome};

/// Per-leg effects of a resolved trade, indexed like the input legs.
#[derive(Debug, Clone, Serialize)]
pub struct LegSummary {
    pub leg_index: usize,
    pub realized_gain_cents: i64,
    pub opened_lot_id: Option<i64>,
    pub disposition_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeResolution {
    pub lines: Vec<JournalLine>,
    pub legs: Vec<LegSummary>,
    pub realized_gain_cents: i64,
}

/// Apply every leg to the lot inventory and collect the trade's journal
/// lines. Any failure leaves the caller's transaction to roll the lot
/// mutations back; nothing here is visible unless the whole trade commits.
pub async fn resolve_trade(
    conn: &mut SqliteConnection,
    user_id: i64,
    legs: &[TradeLeg],
    journal_id: i64,
) -> Result<TradeResolution, LedgerError> {
    for (i, leg) in legs.iter().enumerate() {
        if leg.quantity <= 0 {
            return Err(LedgerError::InvalidLeg {
                leg_index: i,
                reason: "quantity must be positive".to_string(),
            });
        }
        if leg.price_cents < 0 || leg.fees_cents < 0 {
            return Err(LedgerError::InvalidLeg {
                leg_index: i,
                reason: "price and fees must be non-negative".to_string(),
            });
        }
    }

    let mut order: Vec<usize> = (0..legs.len()).collect();
    order.sort_by_key(|&i| (legs[i].date, i));

    let mut outcomes: Vec<Option<LegOutcome>> = vec![None; legs.len()];

    for &i in &order {
        if outcomes[i].is_some() {
            continue;
        }
        let leg = &legs[i];
        match leg.action {
            LegAction::Open => {
                outcomes[i] = Some(open_leg(conn, user_id, leg, i).await?);
            }
            LegAction::Close => {
                outcomes[i] = Some(close_leg(conn, user_id, leg, i, journal_id).await?);
            }
            LegAction::Assignment => {
                let partner = order.iter().copied().find(|&j| {
                    j != i
                        && outcomes[j].is_none()
                        && legs[j].action == LegAction::Assignment
                        && legs[j].instrument.symbol == leg.instrument.symbol
                        && legs[j].instrument.is_option() != leg.instrument.is_option()
                });
                let Some(j) = partner else {
                    return Err(LedgerError::InvalidLeg {
                        leg_index: i,
                        reason: "assignment leg has no matching conversion leg".to_string(),
                    });
                };
                let (opt, stk) = if leg.instrument.is_option() {
                    (i, j)
                } else {
                    (j, i)
                };
                let (opt_out, stk_out) =
                    convert_assignment(conn, user_id, &legs[opt], opt, &legs[stk], stk, journal_id)
                        .await?;
                outcomes[opt] = Some(opt_out);
                outcomes[stk] = Some(stk_out);
            }
        }
    }

    let mut resolution = TradeResolution {
        lines: Vec::new(),
        legs: Vec::new(),
        realized_gain_cents: 0,
    };
    for &i in &order {
        let Some(outcome) = outcomes[i].take() else {
            continue;
        };
        resolution.lines.extend(outcome.lines);
        resolution.realized_gain_cents += outcome.realized_gain_cents;
        resolution.legs.push(LegSummary {
            leg_index: i,
            realized_gain_cents: outcome.realized_gain_cents,
            opened_lot_id: outcome.opened_lot_id,
            disposition_ids: outcome.disposition_ids,
        });
    }

    Ok(resolution)
}
