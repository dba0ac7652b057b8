use crate::domain::errors::JournalError;
use crate::domain::portfolio::{ClosedTrade, CloseReason, OpenPosition, PositionKey};
use crate::domain::repositories::{
    CapitalEvent, CapitalEventKind, ConditionalOrderStore, DailyPerformance, FillJournal,
    OrderRecord, OrderStore, PerformanceStore, PortfolioSnapshot, PositionStore, PositionUpdate,
    ScanSnapshot, ScanStore, SignalRecord, SignalStore, StrategyStateStore, TradeStore,
};
use crate::domain::risk::RiskState;
use crate::domain::signal::Intent;
use crate::domain::types::{ConditionalKind, ConditionalOrder, ConditionalStatus, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::debug;

use super::Database;

/// The single journal over the embedded database. Implements every store
/// trait; hand it out as `Arc<SqliteJournal>` and coerce per seam.
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.writer.clone(),
        }
    }
}

fn dec(row: &SqliteRow, col: &str) -> Result<Decimal, JournalError> {
    let raw: String = row
        .try_get(col)
        .map_err(|e| JournalError::Corrupt(format!("{}: {}", col, e)))?;
    Decimal::from_str(&raw).map_err(|e| JournalError::Corrupt(format!("{}: {}", col, e)))
}

fn dec_opt(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, JournalError> {
    let raw: Option<String> = row
        .try_get(col)
        .map_err(|e| JournalError::Corrupt(format!("{}: {}", col, e)))?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| JournalError::Corrupt(format!("{}: {}", col, e)))
    })
    .transpose()
}

fn epoch(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>, JournalError> {
    let secs: i64 = row
        .try_get(col)
        .map_err(|e| JournalError::Corrupt(format!("{}: {}", col, e)))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| JournalError::Corrupt(format!("{}: bad timestamp {}", col, secs)))
}

fn row_to_trade(row: &SqliteRow) -> Result<ClosedTrade, JournalError> {
    let intent: String = row
        .try_get("intent")
        .map_err(|e| JournalError::Corrupt(e.to_string()))?;
    let close_reason: String = row
        .try_get("close_reason")
        .map_err(|e| JournalError::Corrupt(e.to_string()))?;
    Ok(ClosedTrade {
        id: row
            .try_get("id")
            .map_err(|e| JournalError::Corrupt(e.to_string()))?,
        symbol: row
            .try_get("symbol")
            .map_err(|e| JournalError::Corrupt(e.to_string()))?,
        tag: row
            .try_get("tag")
            .map_err(|e| JournalError::Corrupt(e.to_string()))?,
        qty: dec(row, "qty")?,
        entry_price: dec(row, "entry_price")?,
        exit_price: dec(row, "exit_price")?,
        pnl: dec(row, "pnl")?,
        pnl_pct: dec(row, "pnl_pct")?,
        fees: dec(row, "fees")?,
        intent: Intent::from_str(&intent).map_err(JournalError::Corrupt)?,
        strategy_version: row
            .try_get("strategy_version")
            .map_err(|e| JournalError::Corrupt(e.to_string()))?,
        strategy_regime: row
            .try_get("strategy_regime")
            .map_err(|e| JournalError::Corrupt(e.to_string()))?,
        close_reason: CloseReason::from_str(&close_reason).map_err(JournalError::Corrupt)?,
        opened_at: epoch(row, "opened_at")?,
        closed_at: epoch(row, "closed_at")?,
        mae_pct: dec(row, "mae")?,
    })
}

async fn upsert_position_tx(
    tx: &mut Transaction<'_, Sqlite>,
    position: &OpenPosition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO positions (symbol, tag, qty, avg_entry, opened_at, intent,
                               stop_loss, take_profit, mae, entry_fees)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(symbol, tag) DO UPDATE SET
            qty = excluded.qty,
            avg_entry = excluded.avg_entry,
            intent = excluded.intent,
            stop_loss = excluded.stop_loss,
            take_profit = excluded.take_profit,
            mae = excluded.mae,
            entry_fees = excluded.entry_fees
        "#,
    )
    .bind(&position.symbol)
    .bind(&position.tag)
    .bind(position.qty.to_string())
    .bind(position.avg_entry.to_string())
    .bind(position.opened_at.timestamp())
    .bind(position.intent.as_str())
    .bind(position.stop_loss.map(|p| p.to_string()))
    .bind(position.take_profit.map(|p| p.to_string()))
    .bind(position.mae_pct.to_string())
    .bind(position.entry_fees.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_trade_tx(
    tx: &mut Transaction<'_, Sqlite>,
    trade: &ClosedTrade,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO trades (id, symbol, tag, side, qty, entry_price, exit_price,
                            pnl, pnl_pct, fees, intent, strategy_version,
                            strategy_regime, close_reason, opened_at, closed_at, mae)
        VALUES (?, ?, ?, 'SELL', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&trade.id)
    .bind(&trade.symbol)
    .bind(&trade.tag)
    .bind(trade.qty.to_string())
    .bind(trade.entry_price.to_string())
    .bind(trade.exit_price.to_string())
    .bind(trade.pnl.to_string())
    .bind(trade.pnl_pct.to_string())
    .bind(trade.fees.to_string())
    .bind(trade.intent.as_str())
    .bind(&trade.strategy_version)
    .bind(&trade.strategy_regime)
    .bind(trade.close_reason.as_str())
    .bind(trade.opened_at.timestamp())
    .bind(trade.closed_at.timestamp())
    .bind(trade.mae_pct.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl TradeStore for SqliteJournal {
    async fn journal_fill(&self, journal: &FillJournal) -> Result<(), JournalError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE orders SET status = ?, filled_at = ?, fill_price = ?, fee = ? WHERE id = ?",
        )
        .bind(journal.order_status.as_str())
        .bind(journal.filled_at.timestamp())
        .bind(journal.fill_price.to_string())
        .bind(journal.fee.to_string())
        .bind(&journal.order_id)
        .execute(&mut *tx)
        .await?;

        match &journal.position {
            PositionUpdate::Upsert(position) => upsert_position_tx(&mut tx, position).await?,
            PositionUpdate::Remove(key) => {
                sqlx::query("DELETE FROM positions WHERE symbol = ? AND tag = ?")
                    .bind(&key.symbol)
                    .bind(&key.tag)
                    .execute(&mut *tx)
                    .await?;
            }
            PositionUpdate::None => {}
        }

        if let Some(trade) = &journal.closed_trade {
            insert_trade_tx(&mut tx, trade).await?;
        }

        sqlx::query("INSERT INTO portfolio_snapshots (ts, cash, total_value) VALUES (?, ?, ?)")
            .bind(journal.filled_at.timestamp())
            .bind(journal.cash_after.to_string())
            .bind(journal.total_value_after.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Journal: fill {} committed", journal.order_id);
        Ok(())
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<ClosedTrade>, JournalError> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY closed_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut trades = rows
            .iter()
            .map(row_to_trade)
            .collect::<Result<Vec<_>, _>>()?;
        trades.reverse(); // oldest first
        Ok(trades)
    }

    async fn trades_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ClosedTrade>, JournalError> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE closed_at >= ? AND closed_at < ? ORDER BY closed_at ASC",
        )
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_trade).collect()
    }
}

#[async_trait]
impl PositionStore for SqliteJournal {
    async fn upsert(&self, position: &OpenPosition) -> Result<(), JournalError> {
        let mut tx = self.pool.begin().await?;
        upsert_position_tx(&mut tx, position).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, key: &PositionKey) -> Result<(), JournalError> {
        sqlx::query("DELETE FROM positions WHERE symbol = ? AND tag = ?")
            .bind(&key.symbol)
            .bind(&key.tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<OpenPosition>, JournalError> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY symbol, tag")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let intent: String = row
                    .try_get("intent")
                    .map_err(|e| JournalError::Corrupt(e.to_string()))?;
                Ok(OpenPosition {
                    symbol: row
                        .try_get("symbol")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    tag: row
                        .try_get("tag")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    qty: dec(row, "qty")?,
                    avg_entry: dec(row, "avg_entry")?,
                    opened_at: epoch(row, "opened_at")?,
                    intent: Intent::from_str(&intent).map_err(JournalError::Corrupt)?,
                    stop_loss: dec_opt(row, "stop_loss")?,
                    take_profit: dec_opt(row, "take_profit")?,
                    mae_pct: dec(row, "mae")?,
                    entry_fees: dec(row, "entry_fees")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SignalStore for SqliteJournal {
    async fn record(&self, signal: &SignalRecord) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            INSERT INTO signals (symbol, action, size_pct, confidence, intent, tag,
                                 reasoning, strategy_version, strategy_regime,
                                 acted_on, rejected_reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.symbol)
        .bind(&signal.action)
        .bind(signal.size_pct.to_string())
        .bind(signal.confidence.to_string())
        .bind(&signal.intent)
        .bind(&signal.tag)
        .bind(&signal.reasoning)
        .bind(&signal.strategy_version)
        .bind(&signal.strategy_regime)
        .bind(signal.acted_on)
        .bind(&signal.rejected_reason)
        .bind(signal.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ScanStore for SqliteJournal {
    async fn record(&self, snapshots: &[ScanSnapshot]) -> Result<(), JournalError> {
        let mut tx = self.pool.begin().await?;
        for snapshot in snapshots {
            sqlx::query(
                r#"
                INSERT INTO scan_results (ts, symbol, price, ema_fast, ema_slow, rsi,
                                          volume_ratio, spread, strategy_regime,
                                          signal_generated, signal_action, signal_confidence)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(snapshot.ts.timestamp())
            .bind(&snapshot.symbol)
            .bind(snapshot.price.to_string())
            .bind(snapshot.ema_fast.map(|d| d.to_string()))
            .bind(snapshot.ema_slow.map(|d| d.to_string()))
            .bind(snapshot.rsi.map(|d| d.to_string()))
            .bind(snapshot.volume_ratio.map(|d| d.to_string()))
            .bind(snapshot.spread.to_string())
            .bind(&snapshot.strategy_regime)
            .bind(snapshot.signal_generated)
            .bind(snapshot.signal_action.as_deref())
            .bind(snapshot.signal_confidence.map(|d| d.to_string()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for SqliteJournal {
    async fn record(&self, order: &OrderRecord) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, exchange_order_id, symbol, side, qty, limit_price,
                                status, created_at, filled_at, fill_price, fee)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                exchange_order_id = excluded.exchange_order_id,
                status = excluded.status,
                filled_at = excluded.filled_at,
                fill_price = excluded.fill_price,
                fee = excluded.fee
            "#,
        )
        .bind(&order.id)
        .bind(&order.exchange_order_id)
        .bind(&order.symbol)
        .bind(&order.side)
        .bind(order.qty.to_string())
        .bind(order.limit_price.map(|p| p.to_string()))
        .bind(order.status.as_str())
        .bind(order.created_at.timestamp())
        .bind(order.filled_at.map(|t| t.timestamp()))
        .bind(order.fill_price.map(|p| p.to_string()))
        .bind(order.fee.map(|f| f.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        exchange_order_id: Option<&str>,
    ) -> Result<(), JournalError> {
        sqlx::query(
            "UPDATE orders SET status = ?, exchange_order_id = COALESCE(?, exchange_order_id) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(exchange_order_id)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<OrderRecord>, JournalError> {
        let rows = sqlx::query("SELECT * FROM orders WHERE status = 'open' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let status: String = row
                    .try_get("status")
                    .map_err(|e| JournalError::Corrupt(e.to_string()))?;
                let filled_at: Option<i64> = row
                    .try_get("filled_at")
                    .map_err(|e| JournalError::Corrupt(e.to_string()))?;
                Ok(OrderRecord {
                    id: row
                        .try_get("id")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    exchange_order_id: row
                        .try_get("exchange_order_id")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    symbol: row
                        .try_get("symbol")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    side: row
                        .try_get("side")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    qty: dec(row, "qty")?,
                    limit_price: dec_opt(row, "limit_price")?,
                    status: OrderStatus::from_str(&status).map_err(JournalError::Corrupt)?,
                    created_at: epoch(row, "created_at")?,
                    filled_at: filled_at.and_then(|s| Utc.timestamp_opt(s, 0).single()),
                    fill_price: dec_opt(row, "fill_price")?,
                    fee: dec_opt(row, "fee")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ConditionalOrderStore for SqliteJournal {
    async fn upsert(&self, order: &ConditionalOrder) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            INSERT INTO conditional_orders (id, symbol, tag, kind, trigger_price, status)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                trigger_price = excluded.trigger_price,
                status = excluded.status
            "#,
        )
        .bind(&order.id)
        .bind(&order.symbol)
        .bind(&order.tag)
        .bind(order.kind.as_str())
        .bind(order.trigger_price.to_string())
        .bind(order.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: ConditionalStatus,
    ) -> Result<(), JournalError> {
        sqlx::query("UPDATE conditional_orders SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active(&self) -> Result<Vec<ConditionalOrder>, JournalError> {
        let rows = sqlx::query("SELECT * FROM conditional_orders WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let kind: String = row
                    .try_get("kind")
                    .map_err(|e| JournalError::Corrupt(e.to_string()))?;
                let kind = match kind.as_str() {
                    "stop_loss" => ConditionalKind::StopLoss,
                    "take_profit" => ConditionalKind::TakeProfit,
                    other => {
                        return Err(JournalError::Corrupt(format!(
                            "unknown conditional kind: {}",
                            other
                        )));
                    }
                };
                Ok(ConditionalOrder {
                    id: row
                        .try_get("id")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    symbol: row
                        .try_get("symbol")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    tag: row
                        .try_get("tag")
                        .map_err(|e| JournalError::Corrupt(e.to_string()))?,
                    kind,
                    trigger_price: dec(row, "trigger_price")?,
                    status: ConditionalStatus::Active,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PerformanceStore for SqliteJournal {
    async fn record_daily(&self, row: &DailyPerformance) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            INSERT INTO daily_performance (date, portfolio_value, cash, total_trades,
                                           wins, losses, gross_pnl, net_pnl, fees_total,
                                           max_drawdown_pct, win_rate, expectancy,
                                           strategy_version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                portfolio_value = excluded.portfolio_value,
                cash = excluded.cash,
                total_trades = excluded.total_trades,
                wins = excluded.wins,
                losses = excluded.losses,
                gross_pnl = excluded.gross_pnl,
                net_pnl = excluded.net_pnl,
                fees_total = excluded.fees_total,
                max_drawdown_pct = excluded.max_drawdown_pct,
                win_rate = excluded.win_rate,
                expectancy = excluded.expectancy,
                strategy_version = excluded.strategy_version
            "#,
        )
        .bind(row.date.to_string())
        .bind(row.portfolio_value.to_string())
        .bind(row.cash.to_string())
        .bind(row.total_trades)
        .bind(row.wins)
        .bind(row.losses)
        .bind(row.gross_pnl.to_string())
        .bind(row.net_pnl.to_string())
        .bind(row.fees_total.to_string())
        .bind(row.max_drawdown_pct.to_string())
        .bind(row.win_rate.to_string())
        .bind(row.expectancy.to_string())
        .bind(&row.strategy_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_capital_event(&self, event: &CapitalEvent) -> Result<(), JournalError> {
        sqlx::query("INSERT INTO capital_events (ts, kind, amount) VALUES (?, ?, ?)")
            .bind(event.ts.timestamp())
            .bind(event.kind.as_str())
            .bind(event.amount.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn capital_events(&self) -> Result<Vec<CapitalEvent>, JournalError> {
        let rows = sqlx::query("SELECT * FROM capital_events ORDER BY ts")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let kind: String = row
                    .try_get("kind")
                    .map_err(|e| JournalError::Corrupt(e.to_string()))?;
                let kind = match kind.as_str() {
                    "deposit" => CapitalEventKind::Deposit,
                    "withdrawal" => CapitalEventKind::Withdrawal,
                    "mark" => CapitalEventKind::Mark,
                    other => {
                        return Err(JournalError::Corrupt(format!(
                            "unknown capital event kind: {}",
                            other
                        )));
                    }
                };
                Ok(CapitalEvent {
                    ts: epoch(row, "ts")?,
                    kind,
                    amount: dec(row, "amount")?,
                })
            })
            .collect()
    }

    async fn record_risk_snapshot(&self, state: &RiskState) -> Result<(), JournalError> {
        let state_json = serde_json::to_string(state)
            .map_err(|e| JournalError::Corrupt(format!("risk state encode: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO risk_state_snapshots (ts, state_json, daily_pnl, drawdown_pct,
                                              halted, halt_reason)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.updated_at.timestamp())
        .bind(state_json)
        .bind(state.daily_pnl.to_string())
        .bind(state.drawdown_pct.to_string())
        .bind(state.is_halted())
        .bind(&state.halt_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_risk_snapshot(&self) -> Result<Option<RiskState>, JournalError> {
        let row = sqlx::query(
            "SELECT state_json FROM risk_state_snapshots ORDER BY ts DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let raw: String = row
                .try_get("state_json")
                .map_err(|e| JournalError::Corrupt(e.to_string()))?;
            serde_json::from_str(&raw)
                .map_err(|e| JournalError::Corrupt(format!("risk state decode: {}", e)))
        })
        .transpose()
    }

    async fn record_portfolio_snapshot(
        &self,
        snapshot: &PortfolioSnapshot,
    ) -> Result<(), JournalError> {
        sqlx::query("INSERT INTO portfolio_snapshots (ts, cash, total_value) VALUES (?, ?, ?)")
            .bind(snapshot.ts.timestamp())
            .bind(snapshot.cash.to_string())
            .bind(snapshot.total_value.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_portfolio_snapshot(
        &self,
    ) -> Result<Option<PortfolioSnapshot>, JournalError> {
        let row = sqlx::query(
            "SELECT ts, cash, total_value FROM portfolio_snapshots ORDER BY ts DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(PortfolioSnapshot {
                ts: epoch(&row, "ts")?,
                cash: dec(&row, "cash")?,
                total_value: dec(&row, "total_value")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl StrategyStateStore for SqliteJournal {
    async fn save(
        &self,
        strategy_version: &str,
        blob: &serde_json::Value,
    ) -> Result<(), JournalError> {
        sqlx::query(
            "INSERT INTO strategy_state (strategy_version, blob, saved_at) VALUES (?, ?, ?)",
        )
        .bind(strategy_version)
        .bind(blob.to_string())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(
        &self,
        strategy_version: Option<&str>,
    ) -> Result<Option<(String, serde_json::Value)>, JournalError> {
        let row = match strategy_version {
            Some(version) => {
                sqlx::query(
                    "SELECT strategy_version, blob FROM strategy_state WHERE strategy_version = ? ORDER BY saved_at DESC, id DESC LIMIT 1",
                )
                .bind(version)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT strategy_version, blob FROM strategy_state ORDER BY saved_at DESC, id DESC LIMIT 1",
                )
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.map(|row| {
            let version: String = row
                .try_get("strategy_version")
                .map_err(|e| JournalError::Corrupt(e.to_string()))?;
            let raw: String = row
                .try_get("blob")
                .map_err(|e| JournalError::Corrupt(e.to_string()))?;
            let blob = serde_json::from_str(&raw)
                .map_err(|e| JournalError::Corrupt(format!("strategy blob decode: {}", e)))?;
            Ok((version, blob))
        })
        .transpose()
    }
}
