use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

#[derive(Clone)]
pub struct LedgerDb {
    pool: SqlitePool,
}

impl LedgerDb {
    /// Open (creating if missing) and initialize the ledger database.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        // WAL keeps readers (reports, wash-sale scans) off the writers' backs.
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../../../schema.sql");

        // Execute schema (split by statement since sqlx doesn't support multiple statements)
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
