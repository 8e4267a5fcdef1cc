//! Turning imported broker rows into trade legs. Rows with structured symbol
//! and action columns map directly; the rest fall back to scanning the row's
//! name text and are flagged low confidence.

use chrono::NaiveDate;
use ledger_core::money::parse_cents;
use ledger_core::{
    ContractType, Instrument, InvestmentTransaction, LegAction, ParseConfidence, PositionType,
    TradeLeg,
};
use tracing::warn;

/// Tokens that look like tickers but never are.
const NAME_KEYWORDS: [&str; 16] = [
    "BUY", "SELL", "BOUGHT", "SOLD", "TO", "OPEN", "CLOSE", "PUT", "CALL", "ASSIGNED",
    "ASSIGNMENT", "EXERCISE", "EXERCISED", "SHARES", "OF", "AT",
];

/// Derive a committable leg from one imported row. `None` means the row is
/// not a recognizable trade and stays un-categorized.
pub fn derive_leg(row: &InvestmentTransaction) -> Option<TradeLeg> {
    if row.txn_type != "buy" && row.txn_type != "sell" {
        return None;
    }
    if row.quantity <= 0 || row.price_cents < 0 || row.fees_cents < 0 {
        return None;
    }

    // Structured rows map or get rejected; only rows without the structured
    // columns fall back to text scanning.
    if row.symbol.is_some() && row.action_hint.is_some() {
        return structured_leg(row);
    }

    let leg = freetext_leg(row)?;
    warn!(
        "Low confidence parse for row {}: {:?} read as {} {} {}",
        row.id.unwrap_or_default(),
        row.name,
        leg.action.as_str(),
        leg.position_type.as_str(),
        leg.instrument
    );
    Some(leg)
}

fn structured_leg(row: &InvestmentTransaction) -> Option<TradeLeg> {
    let symbol = row.symbol.as_deref()?;
    let action = LegAction::parse(row.action_hint.as_deref()?)?;

    let instrument = Instrument::from_columns(
        symbol,
        row.contract_type.as_deref(),
        row.strike_cents,
        row.expiry,
    );
    // a contract type with no strike or expiry is not a usable option row
    if row.contract_type.is_some() && instrument.contract.is_none() {
        return None;
    }

    let contract_type = instrument.contract.map(|c| c.contract_type);
    let position_type = position_for(&row.txn_type, action, contract_type)?;

    Some(leg_from_row(row, instrument, action, position_type, ParseConfidence::High))
}

/// Scan the row name for an action phrase, a ticker and option terms. The
/// symbol column, when present, beats any ticker found in the text.
fn freetext_leg(row: &InvestmentTransaction) -> Option<TradeLeg> {
    let lower = row.name.to_lowercase();
    let tokens: Vec<&str> = row.name.split_whitespace().collect();

    let action = if lower.contains("to open") {
        LegAction::Open
    } else if lower.contains("to close") {
        LegAction::Close
    } else if lower.contains("assign") || lower.contains("exercis") {
        LegAction::Assignment
    } else if row.txn_type == "buy" {
        LegAction::Open
    } else {
        LegAction::Close
    };

    let symbol = match row.symbol.as_deref() {
        Some(s) => s.to_string(),
        None => find_ticker(&tokens)?.to_string(),
    };

    let contract_type = tokens.iter().copied().find_map(|t| {
        if t.eq_ignore_ascii_case("put") {
            Some(ContractType::Put)
        } else if t.eq_ignore_ascii_case("call") {
            Some(ContractType::Call)
        } else {
            None
        }
    });

    let instrument = match contract_type {
        None => Instrument::shares(&symbol),
        Some(kind) => {
            let expiry = tokens.iter().copied().find_map(parse_date_token)?;
            let strike_cents = find_strike(&tokens, kind)?;
            Instrument::option(&symbol, kind, strike_cents, expiry)
        }
    };

    let position_type = position_for(&row.txn_type, action, contract_type)?;
    Some(leg_from_row(row, instrument, action, position_type, ParseConfidence::Low))
}

fn leg_from_row(
    row: &InvestmentTransaction,
    instrument: Instrument,
    action: LegAction,
    position_type: PositionType,
    confidence: ParseConfidence,
) -> TradeLeg {
    TradeLeg {
        instrument,
        action,
        position_type,
        quantity: row.quantity,
        price_cents: row.price_cents,
        fees_cents: row.fees_cents,
        date: row.txn_date,
        source_txn_ids: row.id.map(|id| vec![id]).unwrap_or_default(),
        confidence,
    }
}

/// Opens take the side of the verb, closes the side of the lot being closed.
/// Assignment sides follow the two share-acquiring conversions: a put being
/// assigned consumes a written (short) option, a call being exercised
/// consumes a held (long) one, and the share leg is always long.
fn position_for(
    txn_type: &str,
    action: LegAction,
    contract_type: Option<ContractType>,
) -> Option<PositionType> {
    match action {
        LegAction::Open => match txn_type {
            "buy" => Some(PositionType::Long),
            "sell" => Some(PositionType::Short),
            _ => None,
        },
        LegAction::Close => match txn_type {
            "sell" => Some(PositionType::Long),
            "buy" => Some(PositionType::Short),
            _ => None,
        },
        LegAction::Assignment => match contract_type {
            Some(ContractType::Put) => Some(PositionType::Short),
            Some(ContractType::Call) => Some(PositionType::Long),
            None => Some(PositionType::Long),
        },
    }
}

fn find_ticker<'a>(tokens: &[&'a str]) -> Option<&'a str> {
    tokens.iter().copied().find(|t| {
        !t.is_empty()
            && t.len() <= 5
            && t.chars().all(|c| c.is_ascii_uppercase())
            && !NAME_KEYWORDS.contains(t)
    })
}

fn parse_date_token(token: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(token, "%m/%d/%Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Some(d);
    }
    None
}

/// Strike hunting: first the tokens adjacent to the put/call keyword, then
/// any money-looking token ("$50", "50.00") anywhere in the name. Bare
/// integers elsewhere are more likely quantities than strikes.
fn find_strike(tokens: &[&str], kind: ContractType) -> Option<i64> {
    let keyword = match kind {
        ContractType::Put => "put",
        ContractType::Call => "call",
    };
    let pos = tokens.iter().position(|t| t.eq_ignore_ascii_case(keyword))?;

    let adjacent = tokens
        .get(pos + 1)
        .and_then(|t| parse_cents(t))
        .or_else(|| {
            pos.checked_sub(1)
                .and_then(|i| tokens.get(i))
                .and_then(|t| parse_cents(t))
        });

    adjacent
        .or_else(|| {
            tokens
                .iter()
                .copied()
                .filter(|t| t.starts_with('$') || t.contains('.'))
                .find_map(parse_cents)
        })
        .filter(|strike| *strike > 0)
}
