//! Default chart of accounts. Every user gets the same starter chart; posting
//! only ever references accounts by (user_id, code).

use sqlx::SqliteConnection;

use crate::error::LedgerError;
use crate::models::AccountType;

pub const CASH: &str = "1000";
pub const INVESTMENTS: &str = "1500";
pub const SHORT_PREMIUM: &str = "2500";
pub const OPENING_EQUITY: &str = "3000";
pub const REALIZED_GAINS: &str = "4500";
pub const TRADING_FEES: &str = "6100";

pub const DEFAULT_CHART: &[(&str, &str, AccountType)] = &[
    (CASH, "Brokerage Cash", AccountType::Asset),
    (INVESTMENTS, "Investments at Cost", AccountType::Asset),
    (SHORT_PREMIUM, "Short Option Premium", AccountType::Liability),
    (OPENING_EQUITY, "Opening Balances", AccountType::Equity),
    (REALIZED_GAINS, "Realized Investment Gains", AccountType::Revenue),
    (TRADING_FEES, "Trading Fees & Commissions", AccountType::Expense),
];

/// Insert the default chart for a user. Codes already present are left alone,
/// so re-running is safe.
pub async fn seed_default_chart(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<(), LedgerError> {
    for (code, name, account_type) in DEFAULT_CHART {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO accounts (user_id, code, name, account_type, normal_side)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(code)
        .bind(name)
        .bind(account_type.as_str())
        .bind(account_type.normal_side().as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
