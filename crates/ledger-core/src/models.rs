use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::format_cents;

/// Side of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySide::Debit => "D",
            EntrySide::Credit => "C",
        }
    }

    pub fn parse(s: &str) -> Option<EntrySide> {
        match s {
            "D" => Some(EntrySide::Debit),
            "C" => Some(EntrySide::Credit),
            _ => None,
        }
    }

    pub fn opposite(&self) -> EntrySide {
        match self {
            EntrySide::Debit => EntrySide::Credit,
            EntrySide::Credit => EntrySide::Debit,
        }
    }
}

impl fmt::Display for EntrySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account classification; determines which side carries the normal balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
            AccountType::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<AccountType> {
        match s {
            "asset" => Some(AccountType::Asset),
            "liability" => Some(AccountType::Liability),
            "equity" => Some(AccountType::Equity),
            "revenue" => Some(AccountType::Revenue),
            "expense" => Some(AccountType::Expense),
            _ => None,
        }
    }

    /// Assets and expenses carry debit balances; the rest carry credit.
    pub fn normal_side(&self) -> EntrySide {
        match self {
            AccountType::Asset | AccountType::Expense => EntrySide::Debit,
            _ => EntrySide::Credit,
        }
    }
}

/// Long (owned) or short (written/borrowed) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionType {
    Long,
    Short,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::Long => "long",
            PositionType::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<PositionType> {
        match s {
            "long" => Some(PositionType::Long),
            "short" => Some(PositionType::Short),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractType {
    Call,
    Put,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Call => "call",
            ContractType::Put => "put",
        }
    }

    pub fn parse(s: &str) -> Option<ContractType> {
        match s {
            "call" => Some(ContractType::Call),
            "put" => Some(ContractType::Put),
            _ => None,
        }
    }
}

/// What a trade leg does to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegAction {
    Open,
    Close,
    Assignment,
}

impl LegAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegAction::Open => "open",
            LegAction::Close => "close",
            LegAction::Assignment => "assignment",
        }
    }

    pub fn parse(s: &str) -> Option<LegAction> {
        match s {
            "open" => Some(LegAction::Open),
            "close" => Some(LegAction::Close),
            "assignment" => Some(LegAction::Assignment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotStatus {
    Open,
    PartiallyClosed,
    Closed,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Open => "open",
            LotStatus::PartiallyClosed => "partially_closed",
            LotStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<LotStatus> {
        match s {
            "open" => Some(LotStatus::Open),
            "partially_closed" => Some(LotStatus::PartiallyClosed),
            "closed" => Some(LotStatus::Closed),
            _ => None,
        }
    }
}

/// How a leg was derived from its source rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseConfidence {
    High,
    Low,
}

impl ParseConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseConfidence::High => "high",
            ParseConfidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<ParseConfidence> {
        match s {
            "high" => Some(ParseConfidence::High),
            "low" => Some(ParseConfidence::Low),
            _ => None,
        }
    }
}

/// Option series details. Absent on share instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionContract {
    pub contract_type: ContractType,
    pub strike_cents: i64,
    pub expiry: NaiveDate,
}

/// Shares of a symbol, or one option series on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub contract: Option<OptionContract>,
}

impl Instrument {
    pub fn shares(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            contract: None,
        }
    }

    pub fn option(
        symbol: &str,
        contract_type: ContractType,
        strike_cents: i64,
        expiry: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            contract: Some(OptionContract {
                contract_type,
                strike_cents,
                expiry,
            }),
        }
    }

    /// Rebuild an instrument from the nullable contract columns the lot and
    /// leg tables store.
    pub fn from_columns(
        symbol: &str,
        contract_type: Option<&str>,
        strike_cents: Option<i64>,
        expiry: Option<NaiveDate>,
    ) -> Self {
        let contract = match (contract_type, strike_cents, expiry) {
            (Some(kind), Some(strike_cents), Some(expiry)) => {
                ContractType::parse(kind).map(|contract_type| OptionContract {
                    contract_type,
                    strike_cents,
                    expiry,
                })
            }
            _ => None,
        };
        Self {
            symbol: symbol.to_string(),
            contract,
        }
    }

    pub fn is_option(&self) -> bool {
        self.contract.is_some()
    }

    /// Human-readable descriptor, e.g. "AAPL" or "AAPL 2026-01-16 150.00P".
    pub fn describe(&self) -> String {
        match &self.contract {
            None => self.symbol.clone(),
            Some(c) => {
                let kind = match c.contract_type {
                    ContractType::Call => "C",
                    ContractType::Put => "P",
                };
                format!(
                    "{} {} {}{}",
                    self.symbol,
                    c.expiry,
                    format_cents(c.strike_cents),
                    kind
                )
            }
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Option<i64>,
    pub user_id: i64,
    pub code: String,
    pub name: String,
    pub account_type: String, // "asset" | "liability" | "equity" | "revenue" | "expense"
    pub normal_side: String,  // "D" | "C"
    pub settled_cents: i64,
    pub pending_cents: i64,
    pub version: i64,
    pub created_at: Option<String>,
}

impl Account {
    pub fn parsed_type(&self) -> Option<AccountType> {
        AccountType::parse(&self.account_type)
    }

    pub fn parsed_normal_side(&self) -> Option<EntrySide> {
        EntrySide::parse(&self.normal_side)
    }
}

/// A posted journal. Created once, never mutated; corrections post a new
/// journal with `reverses_journal_id` set.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JournalTransaction {
    pub id: Option<i64>,
    pub user_id: i64,
    pub entry_date: NaiveDate,
    pub description: String,
    pub strategy: Option<String>,
    pub trade_num: Option<i64>,
    pub reverses_journal_id: Option<i64>,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Option<i64>,
    pub journal_id: i64,
    pub account_id: i64,
    pub side: String, // "D" | "C"
    pub amount_cents: i64,
    pub created_at: Option<String>,
}

impl LedgerEntry {
    pub fn parsed_side(&self) -> Option<EntrySide> {
        EntrySide::parse(&self.side)
    }
}

/// One line of a journal entry to post, addressed by account code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_code: String,
    pub side: EntrySide,
    pub amount_cents: i64,
}

impl JournalLine {
    pub fn debit(account_code: &str, amount_cents: i64) -> Self {
        Self {
            account_code: account_code.to_string(),
            side: EntrySide::Debit,
            amount_cents,
        }
    }

    pub fn credit(account_code: &str, amount_cents: i64) -> Self {
        Self {
            account_code: account_code.to_string(),
            side: EntrySide::Credit,
            amount_cents,
        }
    }
}

/// One acquisition event. `cost_basis_cents` covers the remaining quantity
/// only; for short lots it holds the net premium credit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockLot {
    pub id: Option<i64>,
    pub user_id: i64,
    pub symbol: String,
    pub contract_type: Option<String>, // "call" | "put"
    pub strike_cents: Option<i64>,
    pub expiry: Option<NaiveDate>,
    pub position_type: String, // "long" | "short"
    pub open_date: NaiveDate,
    pub original_quantity: i64,
    pub quantity_remaining: i64,
    pub open_price_cents: i64,
    pub cost_basis_cents: i64,
    pub status: String, // "open" | "partially_closed" | "closed"
    pub created_at: Option<String>,
}

impl StockLot {
    pub fn instrument(&self) -> Instrument {
        Instrument::from_columns(
            &self.symbol,
            self.contract_type.as_deref(),
            self.strike_cents,
            self.expiry,
        )
    }

    pub fn parsed_position_type(&self) -> Option<PositionType> {
        PositionType::parse(&self.position_type)
    }

    pub fn parsed_status(&self) -> Option<LotStatus> {
        LotStatus::parse(&self.status)
    }
}

/// One closed (or converted) portion of a lot. For short lots `proceeds_cents`
/// holds the allocated open credit and `basis_cents` the cost to close.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LotDisposition {
    pub id: Option<i64>,
    pub user_id: i64,
    pub lot_id: i64,
    pub journal_id: Option<i64>,
    pub close_date: NaiveDate,
    pub quantity: i64,
    pub proceeds_cents: i64,
    pub basis_cents: i64,
    pub realized_gain_cents: i64,
    pub via_assignment: bool,
    pub loss_disallowed: bool,
    pub disallowed_cents: i64,
    pub replacement_lot_id: Option<i64>,
    pub created_at: Option<String>,
}

/// A normalized trade leg ready to commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLeg {
    pub instrument: Instrument,
    pub action: LegAction,
    pub position_type: PositionType,
    pub quantity: i64,
    pub price_cents: i64,
    pub fees_cents: i64,
    pub date: NaiveDate,
    pub source_txn_ids: Vec<i64>,
    pub confidence: ParseConfidence,
}

/// Stored form of a committed leg, one row per leg of a trade.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeLegRecord {
    pub id: Option<i64>,
    pub user_id: i64,
    pub trade_num: i64,
    pub leg_index: i64,
    pub symbol: String,
    pub contract_type: Option<String>,
    pub strike_cents: Option<i64>,
    pub expiry: Option<NaiveDate>,
    pub action: String,        // "open" | "close" | "assignment"
    pub position_type: String, // "long" | "short"
    pub quantity: i64,
    pub price_cents: i64,
    pub fees_cents: i64,
    pub leg_date: NaiveDate,
    pub source_txn_ids: Option<String>, // JSON array of row ids
    pub confidence: String,             // "high" | "low"
    pub created_at: Option<String>,
}

/// Imported broker row. The upstream feed owns every column except
/// `account_code`, `strategy` and `trade_num`, which the categorization pass
/// annotates after a successful commit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvestmentTransaction {
    pub id: Option<i64>,
    pub user_id: i64,
    pub txn_date: NaiveDate,
    pub name: String,
    pub txn_type: String, // "buy" | "sell"
    pub price_cents: i64,
    pub quantity: i64,
    pub fees_cents: i64,
    pub symbol: Option<String>,
    pub action_hint: Option<String>, // "open" | "close" | "assignment"
    pub contract_type: Option<String>,
    pub strike_cents: Option<i64>,
    pub expiry: Option<NaiveDate>,
    pub account_code: Option<String>,
    pub strategy: Option<String>,
    pub trade_num: Option<i64>,
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_sides() {
        assert_eq!(AccountType::Asset.normal_side(), EntrySide::Debit);
        assert_eq!(AccountType::Expense.normal_side(), EntrySide::Debit);
        assert_eq!(AccountType::Liability.normal_side(), EntrySide::Credit);
        assert_eq!(AccountType::Revenue.normal_side(), EntrySide::Credit);
        assert_eq!(AccountType::Equity.normal_side(), EntrySide::Credit);
    }

    #[test]
    fn test_enum_round_trips() {
        for side in [EntrySide::Debit, EntrySide::Credit] {
            assert_eq!(EntrySide::parse(side.as_str()), Some(side));
        }
        for status in [
            LotStatus::Open,
            LotStatus::PartiallyClosed,
            LotStatus::Closed,
        ] {
            assert_eq!(LotStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LegAction::parse("assignment"), Some(LegAction::Assignment));
        assert!(EntrySide::parse("debit").is_none());
    }

    #[test]
    fn test_instrument_describe() {
        assert_eq!(Instrument::shares("AAPL").describe(), "AAPL");

        let put = Instrument::option(
            "XYZ",
            ContractType::Put,
            15000,
            NaiveDate::from_ymd_opt(2026, 1, 16).unwrap(),
        );
        assert_eq!(put.describe(), "XYZ 2026-01-16 150.00P");
        assert!(put.is_option());
    }
}
