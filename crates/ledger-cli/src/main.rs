//! ledger-cli: operator entry point for the bookkeeping pipeline.
//!
//! Usage:
//!   cargo run -p ledger-cli -- categorize [--user 1]
//!   cargo run -p ledger-cli -- wash-sales --user 1 [--apply]
//!   cargo run -p ledger-cli -- form8949 --user 1 --year 2025 [--out 8949.csv]
//!   cargo run -p ledger-cli -- report --user 1 --year 2025
//!   cargo run -p ledger-cli -- balances --user 1

use ledger_core::money::format_cents;
use ledger_core::LedgerDb;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ledger_cli=info,trade_import=info,posting_engine=info,wash_sale=info".into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).cloned().unwrap_or_default();
    if !matches!(
        command.as_str(),
        "categorize" | "wash-sales" | "form8949" | "report" | "balances"
    ) {
        usage();
    }

    let db_path = arg_value(&args, "--db")
        .or_else(|| std::env::var("LEDGER_DB").ok())
        .unwrap_or_else(|| "folio.db".to_string());
    let user = arg_value(&args, "--user").and_then(|v| v.parse::<i64>().ok());
    let year = arg_value(&args, "--year").and_then(|v| v.parse::<i32>().ok());

    tracing::info!("ledger-cli: {} on {}", command, db_path);
    let db = LedgerDb::new(&format!("sqlite:{}", db_path)).await?;

    match command.as_str() {
        "categorize" => {
            let summaries = match user {
                Some(user_id) => vec![trade_import::categorize_user(&db, user_id).await?],
                None => trade_import::run_categorization(&db).await?,
            };
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        "wash-sales" => {
            let Some(user_id) = user else { usage() };
            let mut conn = db.pool().acquire().await?;
            let report = wash_sale::detect_wash_sales(&mut conn, user_id).await?;
            if args.iter().any(|a| a == "--apply") {
                let outcome =
                    wash_sale::apply_wash_sale_adjustments(&mut conn, user_id, &report.violations)
                        .await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        "form8949" => {
            let Some(user_id) = user else { usage() };
            let Some(tax_year) = year else { usage() };
            let mut conn = db.pool().acquire().await?;
            let rows = tax_report::generate_form_8949(&mut conn, user_id, tax_year).await?;
            let csv = tax_report::form_8949_csv(&rows)?;
            match arg_value(&args, "--out") {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    tracing::info!("Wrote {} Form 8949 rows to {}", rows.len(), path);
                }
                None => print!("{}", csv),
            }
        }
        "report" => {
            let Some(user_id) = user else { usage() };
            let Some(tax_year) = year else { usage() };
            let mut conn = db.pool().acquire().await?;
            let report = tax_report::generate_tax_report(&mut conn, user_id, tax_year).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "balances" => {
            let Some(user_id) = user else { usage() };
            let mut conn = db.pool().acquire().await?;
            let trial = posting_engine::trial_balance(&mut conn, user_id).await?;
            for row in &trial.rows {
                println!(
                    "{:<6} {:<30} {:>14}",
                    row.code,
                    row.name,
                    format_cents(row.settled_cents)
                );
            }
            println!(
                "{:<37} D {:>12} / C {:>12}",
                "totals",
                format_cents(trial.debit_total_cents),
                format_cents(trial.credit_total_cents)
            );
            if !trial.balanced {
                tracing::warn!("Trial balance for user {} does not balance", user_id);
            }
        }
        _ => usage(),
    }

    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  ledger-cli categorize [--user N]        Commit pending imported rows as trades");
    eprintln!("  ledger-cli wash-sales --user N          List wash-sale violations");
    eprintln!("  ledger-cli wash-sales --user N --apply  Move disallowed losses into replacement basis");
    eprintln!("  ledger-cli form8949 --user N --year Y   Form 8949 CSV to stdout (--out PATH for a file)");
    eprintln!("  ledger-cli report --user N --year Y     Tax year summary");
    eprintln!("  ledger-cli balances --user N            Trial balance");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db PATH    SQLite database path (default: folio.db, env LEDGER_DB)");
    std::process::exit(1);
}
