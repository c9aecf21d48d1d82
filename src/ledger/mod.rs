//! Append-only trade ledger.
//!
//! The core writes closed-trade outcomes and per-cycle equity points here
//! and never reads a balance back mid-cycle; it tracks its own balance.

#[cfg(test)]
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::TradeOutcome;

/// Append-only sink for trade outcomes and equity points.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn append(&self, outcome: &TradeOutcome) -> Result<()>;

    async fn record_equity(&self, equity: Decimal, open_positions: usize) -> Result<()>;
}

/// Summary of what the ledger has seen, for the status command.
#[derive(Debug, Clone)]
pub struct LedgerSummary {
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub realized_pnl: f64,
    pub last_equity: Option<f64>,
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) the ledger database.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to ledger database")?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;

        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outcomes (
                id TEXT PRIMARY KEY,
                asset_id TEXT NOT NULL,
                entered_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                committed_size REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                reason TEXT NOT NULL,
                balance_after REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                equity REAL NOT NULL,
                open_positions INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Aggregate what has been recorded so far.
    pub async fn summary(&self) -> Result<LedgerSummary> {
        let (total_trades, wins, losses, realized_pnl): (i64, i64, i64, f64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(realized_pnl > 0), 0),
                COALESCE(SUM(realized_pnl < 0), 0),
                COALESCE(SUM(realized_pnl), 0.0)
            FROM outcomes
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate outcomes")?;

        let last_equity: Option<(f64,)> = sqlx::query_as(
            "SELECT equity FROM equity_points ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read last equity point")?;

        Ok(LedgerSummary {
            total_trades,
            wins,
            losses,
            realized_pnl,
            last_equity: last_equity.map(|(e,)| e),
        })
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn append(&self, outcome: &TradeOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outcomes (
                id, asset_id, entered_at, closed_at, entry_price, exit_price,
                committed_size, realized_pnl, reason, balance_after
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&outcome.id)
        .bind(&outcome.asset_id)
        .bind(outcome.entered_at.to_rfc3339())
        .bind(outcome.closed_at.to_rfc3339())
        .bind(outcome.entry_price.to_f64().unwrap_or(0.0))
        .bind(outcome.exit_price.to_f64().unwrap_or(0.0))
        .bind(outcome.committed_size.to_f64().unwrap_or(0.0))
        .bind(outcome.realized_pnl.to_f64().unwrap_or(0.0))
        .bind(outcome.reason.as_str())
        .bind(outcome.balance_after.to_f64().unwrap_or(0.0))
        .execute(&self.pool)
        .await
        .context("Failed to append outcome")?;

        Ok(())
    }

    async fn record_equity(&self, equity: Decimal, open_positions: usize) -> Result<()> {
        sqlx::query("INSERT INTO equity_points (equity, open_positions) VALUES (?, ?)")
            .bind(equity.to_f64().unwrap_or(0.0))
            .bind(open_positions as i64)
            .execute(&self.pool)
            .await
            .context("Failed to record equity point")?;

        Ok(())
    }
}

/// In-memory ledger for tests.
#[cfg(test)]
pub struct MemoryLedger {
    outcomes: Mutex<Vec<TradeOutcome>>,
    equity_points: Mutex<Vec<Decimal>>,
}

#[cfg(test)]
impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            equity_points: Mutex::new(Vec::new()),
        }
    }

    pub fn outcomes(&self) -> Vec<TradeOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn equity_points(&self) -> Vec<Decimal> {
        self.equity_points
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, outcome: &TradeOutcome) -> Result<()> {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(outcome.clone());
        Ok(())
    }

    async fn record_equity(&self, equity: Decimal, _open_positions: usize) -> Result<()> {
        self.equity_points
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(equity);
        Ok(())
    }
}
