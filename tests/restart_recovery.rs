//! Restart durability: positions, cash and risk counters come back from
//! the journal exactly as they were before shutdown.

mod common;

use common::{SYMBOL, rig_with_db};
use rust_decimal_macros::dec;
use tidebot::application::reconciler::Reconciler;
use tidebot::config::RiskLimits;
use tidebot::domain::portfolio::CloseReason;
use tidebot::domain::repositories::PerformanceStore;
use tidebot::domain::signal::{Intent, Signal, SignalAction};
use tidebot::domain::types::OrderType;
use tidebot::infrastructure::persistence::Database;

fn buy(symbol: &str, tag: &str) -> Signal {
    Signal {
        symbol: symbol.to_string(),
        action: SignalAction::Buy,
        size_pct: dec!(0.05),
        order_type: OrderType::Market,
        limit_price: None,
        stop_loss: Some(dec!(45000)),
        take_profit: Some(dec!(60000)),
        intent: Intent::Swing,
        tag: tag.to_string(),
        confidence: dec!(0.8),
        reasoning: "restart scenario".to_string(),
    }
}

#[tokio::test]
async fn restart_preserves_positions_cash_and_risk_state() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}", dir.path().join("tidebot.db").display());

    // --- first life: trade, snapshot, shut down mid-day -----------------
    let (cash_before, positions_before, daily_trades_before) = {
        let db = Database::connect(&db_url).await.unwrap();
        let rig = rig_with_db(db, dec!(10000), RiskLimits::default()).await;
        rig.quote(SYMBOL, dec!(50000)).await;
        rig.quote("ETHUSD", dec!(3000)).await;

        rig.executor
            .handle_signal(&buy(SYMBOL, "core"), CloseReason::Signal, "test-1", "test")
            .await
            .unwrap();
        rig.executor
            .handle_signal(&buy("ETHUSD", "swing"), CloseReason::Signal, "test-1", "test")
            .await
            .unwrap();

        let state = rig.risk.snapshot().await;
        rig.journal.record_risk_snapshot(&state).await.unwrap();

        let portfolio = rig.portfolio.read().await;
        let mut positions: Vec<_> = portfolio
            .positions
            .values()
            .map(|p| (p.symbol.clone(), p.tag.clone(), p.qty, p.avg_entry))
            .collect();
        positions.sort();
        (portfolio.cash, positions, state.daily_trades)
        // rig dropped: open positions are deliberately NOT closed
    };
    assert_eq!(positions_before.len(), 2);
    assert_eq!(daily_trades_before, 2);

    // --- second life: rebuild from the same journal ---------------------
    let db = Database::connect(&db_url).await.unwrap();
    let rig = rig_with_db(db, dec!(999), RiskLimits::default()).await;
    let reconciler = Reconciler::new(
        rig.paper.clone(),
        rig.executor.clone(),
        rig.portfolio.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.clock.clone(),
        false,
        dec!(999), // must be ignored: the journal has a snapshot
    );
    reconciler.run_startup("test-1").await.unwrap();

    let portfolio = rig.portfolio.read().await;
    assert_eq!(portfolio.cash, cash_before);
    let mut positions: Vec<_> = portfolio
        .positions
        .values()
        .map(|p| (p.symbol.clone(), p.tag.clone(), p.qty, p.avg_entry))
        .collect();
    positions.sort();
    assert_eq!(positions, positions_before);

    let restored = rig.journal.latest_risk_snapshot().await.unwrap().unwrap();
    assert_eq!(restored.daily_trades, daily_trades_before);
}

#[tokio::test]
async fn first_boot_seeds_paper_balance_as_deposit() {
    let db = Database::connect_ephemeral().await.unwrap();
    let rig = rig_with_db(db, dec!(200), RiskLimits::default()).await;
    let reconciler = Reconciler::new(
        rig.paper.clone(),
        rig.executor.clone(),
        rig.portfolio.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.journal.clone(),
        rig.clock.clone(),
        false,
        dec!(200),
    );
    reconciler.run_startup("test-1").await.unwrap();

    assert_eq!(rig.portfolio.read().await.cash, dec!(200));
    let events = rig.journal.capital_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].amount, dec!(200));
}
