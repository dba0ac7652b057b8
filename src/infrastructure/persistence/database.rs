use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Database handle: one write-ahead-journaled writer connection plus a
/// separate read-only pool. The read pool is the seam external read-side
/// collaborators (the REST API, the orchestrator) attach through.
#[derive(Clone)]
pub struct Database {
    pub writer: SqlitePool,
    pub reader: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let write_options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // Single writer: every state transition is serialized through this
        // connection before being acknowledged.
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_options.clone())
            .await
            .context("Failed to connect to SQLite database")?;

        // Schema first: the WAL sidecar files must exist before a
        // read-only connection can attach.
        init(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(write_options.read_only(true).create_if_missing(false))
            .await
            .context("Failed to open read-only database handle")?;

        info!("Connected to database: {}", db_url);
        Ok(Self { writer, reader })
    }

    /// In-memory database for tests. Reader and writer share the pool since
    /// a `:memory:` database is private to its connection.
    pub async fn connect_ephemeral() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        init(&pool).await?;
        Ok(Self {
            writer: pool.clone(),
            reader: pool,
        })
    }
}

async fn init(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            tag TEXT NOT NULL,
            side TEXT NOT NULL DEFAULT 'SELL',
            qty TEXT NOT NULL,
            entry_price TEXT NOT NULL,
            exit_price TEXT NOT NULL,
            pnl TEXT NOT NULL,
            pnl_pct TEXT NOT NULL,
            fees TEXT NOT NULL,
            intent TEXT NOT NULL,
            strategy_version TEXT NOT NULL,
            strategy_regime TEXT NOT NULL,
            close_reason TEXT NOT NULL,
            opened_at INTEGER NOT NULL,
            closed_at INTEGER NOT NULL,
            mae TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trades_closed_at ON trades (closed_at);
        CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades (symbol, tag);
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create trades table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            symbol TEXT NOT NULL,
            tag TEXT NOT NULL,
            qty TEXT NOT NULL,
            avg_entry TEXT NOT NULL,
            opened_at INTEGER NOT NULL,
            intent TEXT NOT NULL,
            stop_loss TEXT,
            take_profit TEXT,
            mae TEXT NOT NULL,
            entry_fees TEXT NOT NULL DEFAULT '0',
            PRIMARY KEY (symbol, tag)
        );
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create positions table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            action TEXT NOT NULL,
            size_pct TEXT NOT NULL,
            confidence TEXT NOT NULL,
            intent TEXT NOT NULL,
            tag TEXT NOT NULL,
            reasoning TEXT NOT NULL,
            strategy_version TEXT NOT NULL,
            strategy_regime TEXT NOT NULL,
            acted_on INTEGER NOT NULL,
            rejected_reason TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_signals_created ON signals (created_at);
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create signals table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            price TEXT NOT NULL,
            ema_fast TEXT,
            ema_slow TEXT,
            rsi TEXT,
            volume_ratio TEXT,
            spread TEXT NOT NULL,
            strategy_regime TEXT NOT NULL,
            signal_generated INTEGER NOT NULL,
            signal_action TEXT,
            signal_confidence TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_scan_results_ts ON scan_results (ts, symbol);
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create scan_results table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            exchange_order_id TEXT,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            qty TEXT NOT NULL,
            limit_price TEXT,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            filled_at INTEGER,
            fill_price TEXT,
            fee TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status);
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create orders table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conditional_orders (
            id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            tag TEXT NOT NULL,
            kind TEXT NOT NULL,
            trigger_price TEXT NOT NULL,
            status TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create conditional_orders table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_performance (
            date TEXT PRIMARY KEY,
            portfolio_value TEXT NOT NULL,
            cash TEXT NOT NULL,
            total_trades INTEGER NOT NULL,
            wins INTEGER NOT NULL,
            losses INTEGER NOT NULL,
            gross_pnl TEXT NOT NULL,
            net_pnl TEXT NOT NULL,
            fees_total TEXT NOT NULL,
            max_drawdown_pct TEXT NOT NULL,
            win_rate TEXT NOT NULL,
            expectancy TEXT NOT NULL,
            strategy_version TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create daily_performance table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS capital_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            kind TEXT NOT NULL,
            amount TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create capital_events table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS risk_state_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            state_json TEXT NOT NULL,
            daily_pnl TEXT NOT NULL,
            drawdown_pct TEXT NOT NULL,
            halted INTEGER NOT NULL,
            halt_reason TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_risk_snapshots_ts ON risk_state_snapshots (ts);
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create risk_state_snapshots table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS portfolio_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            cash TEXT NOT NULL,
            total_value TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_portfolio_snapshots_ts ON portfolio_snapshots (ts);
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create portfolio_snapshots table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS strategy_state (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            strategy_version TEXT NOT NULL,
            blob TEXT NOT NULL,
            saved_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_strategy_state_saved
        ON strategy_state (strategy_version, saved_at);
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create strategy_state table")?;

    info!("Database schema initialized.");
    Ok(())
}
