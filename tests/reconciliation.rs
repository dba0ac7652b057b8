//! Startup reconciliation in live mode: the exchange of record wins, and
//! every divergence is journaled as a synthetic trade.

mod common;

use common::{ScriptedExchange, rig};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tidebot::application::reconciler::Reconciler;
use tidebot::config::RiskLimits;
use tidebot::domain::portfolio::{CloseReason, OpenPosition, PositionKey};
use tidebot::domain::repositories::{PositionStore, TradeStore};
use tidebot::domain::signal::Intent;
use tidebot::infrastructure::exchange::ExchangeAdapter;

fn swing_position(qty: rust_decimal::Decimal) -> OpenPosition {
    OpenPosition {
        symbol: "ETHUSD".to_string(),
        tag: "swing".to_string(),
        qty,
        avg_entry: dec!(3000),
        opened_at: chrono::Utc::now(),
        intent: Intent::Swing,
        stop_loss: None,
        take_profit: None,
        mae_pct: dec!(-0.01),
        entry_fees: dec!(0.5),
    }
}

#[tokio::test]
async fn vanished_position_is_closed_as_reconciliation() {
    let rig = rig(dec!(1000), RiskLimits::default()).await;

    // the journal believes we hold 0.05 ETH
    rig.journal.upsert(&swing_position(dec!(0.05))).await.unwrap();

    // the exchange reports none of it
    let exchange: Arc<dyn ExchangeAdapter> = Arc::new(ScriptedExchange::new(
        dec!(850),
        &[],
        &[("ETHUSD", dec!(2900))],
    ));
    let reconciler = Reconciler::new(
        exchange,
        rig.executor.clone(),
        rig.portfolio.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.clock.clone(),
        true,
        dec!(1000),
    );
    reconciler.run_startup("test-1").await.unwrap();

    // local position zeroed, both in memory and in the journal
    assert!(rig
        .portfolio
        .read()
        .await
        .position(&PositionKey::new("ETHUSD", "swing"))
        .is_none());
    assert!(rig.journal.load_all().await.unwrap().is_empty());

    // divergence journaled as a synthetic trade at the last known price
    let trades = rig.journal.recent_trades(10).await.unwrap();
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade.close_reason, CloseReason::Reconciliation);
    assert_eq!(trade.exit_price, dec!(2900));
    assert_eq!(trade.qty, dec!(0.05));

    // cash mirrors the exchange, not the exchange plus phantom proceeds
    assert_eq!(rig.portfolio.read().await.cash, dec!(850));
}

#[tokio::test]
async fn backed_position_survives_reconciliation() {
    let rig = rig(dec!(1000), RiskLimits::default()).await;
    rig.journal.upsert(&swing_position(dec!(0.05))).await.unwrap();

    let exchange: Arc<dyn ExchangeAdapter> = Arc::new(ScriptedExchange::new(
        dec!(850),
        &[("ETHUSD", dec!(0.05))],
        &[("ETHUSD", dec!(2900))],
    ));
    let reconciler = Reconciler::new(
        exchange,
        rig.executor.clone(),
        rig.portfolio.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.clock.clone(),
        true,
        dec!(1000),
    );
    reconciler.run_startup("test-1").await.unwrap();

    let portfolio = rig.portfolio.read().await;
    let position = portfolio
        .position(&PositionKey::new("ETHUSD", "swing"))
        .expect("backed position must survive");
    assert_eq!(position.qty, dec!(0.05));
    assert!(rig.journal.recent_trades(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn partially_backed_position_is_cut_to_exchange_quantity() {
    let rig = rig(dec!(1000), RiskLimits::default()).await;
    rig.journal.upsert(&swing_position(dec!(0.05))).await.unwrap();

    // exchange holds less than the journal claims
    let exchange: Arc<dyn ExchangeAdapter> = Arc::new(ScriptedExchange::new(
        dec!(850),
        &[("ETHUSD", dec!(0.02))],
        &[("ETHUSD", dec!(2900))],
    ));
    let reconciler = Reconciler::new(
        exchange,
        rig.executor.clone(),
        rig.portfolio.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.clock.clone(),
        true,
        dec!(1000),
    );
    reconciler.run_startup("test-1").await.unwrap();

    // conservative exchange-wins: the unbacked whole position is closed out
    let trades = rig.journal.recent_trades(10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].close_reason, CloseReason::Reconciliation);
}
