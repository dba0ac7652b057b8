//! Position monitor scenarios: MAE tracking and client-side stop
//! enforcement in paper mode.

mod common;

use common::{SYMBOL, rig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tidebot::application::monitor::PositionMonitor;
use tidebot::application::scheduler::JobHandler;
use tidebot::config::RiskLimits;
use tidebot::domain::portfolio::{CloseReason, PositionKey};
use tidebot::domain::signal::{Intent, Signal, SignalAction};
use tidebot::domain::types::OrderType;

fn entry(stop_loss: Decimal, take_profit: Decimal) -> Signal {
    Signal {
        symbol: SYMBOL.to_string(),
        action: SignalAction::Buy,
        size_pct: dec!(0.10),
        order_type: OrderType::Market,
        limit_price: None,
        stop_loss: Some(stop_loss),
        take_profit: Some(take_profit),
        intent: Intent::Swing,
        tag: "core".to_string(),
        confidence: dec!(0.8),
        reasoning: "monitored entry".to_string(),
    }
}

fn monitor_for(rig: &common::Rig) -> PositionMonitor {
    PositionMonitor::new(
        rig.market.clone(),
        rig.portfolio.clone(),
        rig.risk.clone(),
        rig.executor.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.paper.clone(),
        rig.events.clone(),
        rig.identity.clone(),
        false,
    )
}

#[tokio::test]
async fn stop_loss_cross_synthesizes_close() {
    let rig = rig(dec!(10000), RiskLimits::default()).await;
    let monitor = monitor_for(&rig);

    rig.quote(SYMBOL, dec!(50000)).await;
    rig.executor
        .handle_signal(
            &entry(dec!(49000), dec!(56000)),
            CloseReason::Signal,
            "test-1",
            "test",
        )
        .await
        .unwrap();

    // above the stop: nothing happens
    rig.quote(SYMBOL, dec!(49500)).await;
    monitor.run().await.unwrap();
    assert_eq!(rig.portfolio.read().await.positions.len(), 1);

    // dip through the stop
    rig.quote(SYMBOL, dec!(48950)).await;
    monitor.run().await.unwrap();

    assert!(rig.portfolio.read().await.positions.is_empty());
    let trades = tidebot::domain::repositories::TradeStore::recent_trades(&*rig.journal, 10)
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade.close_reason, CloseReason::StopLoss);
    // market exit at the dip price, minus simulator slippage
    assert!(trade.exit_price <= dec!(48950));
    assert!(trade.exit_price > dec!(48900));
    // MAE captured the dip: (48950 - entry) / entry
    assert!(trade.mae_pct < dec!(-0.02), "mae {}", trade.mae_pct);
}

#[tokio::test]
async fn take_profit_cross_synthesizes_close() {
    let rig = rig(dec!(10000), RiskLimits::default()).await;
    let monitor = monitor_for(&rig);

    rig.quote(SYMBOL, dec!(50000)).await;
    rig.executor
        .handle_signal(
            &entry(dec!(45000), dec!(52000)),
            CloseReason::Signal,
            "test-1",
            "test",
        )
        .await
        .unwrap();

    rig.quote(SYMBOL, dec!(52100)).await;
    monitor.run().await.unwrap();

    let trades = tidebot::domain::repositories::TradeStore::recent_trades(&*rig.journal, 10)
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].close_reason, CloseReason::TakeProfit);
    assert!(trades[0].pnl > Decimal::ZERO);
}

#[tokio::test]
async fn mae_survives_into_the_journal_while_open() {
    let rig = rig(dec!(10000), RiskLimits::default()).await;
    let monitor = monitor_for(&rig);

    rig.quote(SYMBOL, dec!(50000)).await;
    rig.executor
        .handle_signal(
            &entry(dec!(40000), dec!(60000)),
            CloseReason::Signal,
            "test-1",
            "test",
        )
        .await
        .unwrap();

    // adverse excursion, then recovery
    rig.quote(SYMBOL, dec!(48000)).await;
    monitor.run().await.unwrap();
    rig.quote(SYMBOL, dec!(51000)).await;
    monitor.run().await.unwrap();

    let stored = tidebot::domain::repositories::PositionStore::load_all(&*rig.journal)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    // worst dip stands even after recovery
    assert!(stored[0].mae_pct < dec!(-0.04), "mae {}", stored[0].mae_pct);
    assert!(rig
        .portfolio
        .read()
        .await
        .position(&PositionKey::new(SYMBOL, "core"))
        .is_some());
}

#[tokio::test]
async fn monitor_marks_portfolio_value_for_drawdown() {
    let limits = RiskLimits {
        max_drawdown_pct: dec!(0.90),
        ..Default::default()
    };
    let rig = rig(dec!(10000), limits).await;
    let monitor = monitor_for(&rig);

    rig.quote(SYMBOL, dec!(50000)).await;
    rig.executor
        .handle_signal(
            &entry(dec!(30000), dec!(80000)),
            CloseReason::Signal,
            "test-1",
            "test",
        )
        .await
        .unwrap();

    rig.quote(SYMBOL, dec!(45000)).await;
    monitor.run().await.unwrap();

    let state = rig.risk.snapshot().await;
    assert!(state.drawdown_pct > Decimal::ZERO);
}
