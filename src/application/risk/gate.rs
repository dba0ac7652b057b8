//! The pre-trade gate: a pure function of the signal, the risk limits, the
//! live counters and a portfolio snapshot. Checks run in a fixed order and
//! the first failure short-circuits. Literal ties on percentage comparisons
//! resolve as admit.

use crate::config::RiskLimits;
use crate::domain::risk::{EngineStatus, GateDecision, RiskState};
use crate::domain::signal::{Signal, SignalAction};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Portfolio facts the gate needs, captured at the moment of evaluation.
#[derive(Debug, Clone)]
pub struct GateContext {
    /// Authoritative total value at gate time. All percentage checks use it.
    pub total_value: Decimal,
    pub current_price: Decimal,
    /// Notional of the existing `(symbol, tag)` position, zero if absent.
    pub existing_notional: Decimal,
    pub position_exists: bool,
    pub open_positions: usize,
    /// Symbol passed the allow-list AND has a known lot step.
    pub symbol_tradable: bool,
    /// Effective round-trip fee at current tier.
    pub round_trip_fee: Decimal,
}

/// Outcome of the pure evaluation. Besides the decision, breaches that
/// demand a state transition are reported for the engine to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub decision: GateDecision,
    pub halt: Option<String>,
}

fn reject(reason: impl Into<String>) -> GateOutcome {
    GateOutcome {
        decision: GateDecision::Rejected {
            reason: reason.into(),
        },
        halt: None,
    }
}

pub fn evaluate(
    signal: &Signal,
    limits: &RiskLimits,
    state: &RiskState,
    ctx: &GateContext,
) -> GateOutcome {
    let is_close = signal.action == SignalAction::Close;

    // 1. Halt state. Closes for existing positions are always allowed.
    if state.status == EngineStatus::Halted {
        if is_close && ctx.position_exists {
            return GateOutcome {
                decision: GateDecision::Admitted,
                halt: None,
            };
        }
        let reason = state
            .halt_reason
            .clone()
            .unwrap_or_else(|| "halted".to_string());
        return reject(format!("halted: {}", reason));
    }

    // 2. Paused state: operator-driven, closes still admitted.
    if state.status == EngineStatus::Paused {
        if is_close && ctx.position_exists {
            return GateOutcome {
                decision: GateDecision::Admitted,
                halt: None,
            };
        }
        return reject("paused");
    }

    // 3. Symbol allow-list (and lot-step availability).
    if !ctx.symbol_tradable {
        return reject(format!("symbol {} not tradable", signal.symbol));
    }

    if is_close {
        if !ctx.position_exists {
            return reject(format!("no position ({}, {})", signal.symbol, signal.tag));
        }
        return GateOutcome {
            decision: GateDecision::Admitted,
            halt: None,
        };
    }

    // 4. Per-trade cap: shape down rather than reject, unless shaping lands
    // below the minimum-notional floor.
    let mut shaped: Option<(Decimal, Decimal)> = None;
    if signal.size_pct > limits.max_trade_pct {
        let capped_notional = limits.max_trade_pct * ctx.total_value;
        if capped_notional < limits.min_notional_usd {
            return reject(format!(
                "shaping {} to {} puts notional {} below floor {}",
                signal.size_pct, limits.max_trade_pct, capped_notional, limits.min_notional_usd
            ));
        }
        shaped = Some((limits.max_trade_pct, signal.size_pct));
    }

    let effective_pct = shaped.map(|(to, _)| to).unwrap_or(signal.size_pct);
    let trade_notional = effective_pct * ctx.total_value;

    if signal.action == SignalAction::Buy {
        // 5. Per-position cap, measured after execution.
        let resulting = ctx.existing_notional + trade_notional;
        if resulting > limits.max_position_pct * ctx.total_value {
            return reject(format!(
                "position ({}, {}) would reach {} of {} cap",
                signal.symbol,
                signal.tag,
                resulting,
                limits.max_position_pct * ctx.total_value
            ));
        }

        // 6. Position count cap applies to new positions only.
        if !ctx.position_exists && ctx.open_positions >= limits.max_positions {
            return reject(format!(
                "{} open positions at cap {}",
                ctx.open_positions, limits.max_positions
            ));
        }
    }

    // 7. Daily loss cap. Breach halts the engine, then rejects.
    let daily_floor = -limits.max_daily_loss_pct * state.start_of_day_value;
    if state.daily_pnl <= daily_floor && state.start_of_day_value > Decimal::ZERO {
        return GateOutcome {
            decision: GateDecision::Rejected {
                reason: format!("daily loss {} breached cap {}", state.daily_pnl, daily_floor),
            },
            halt: Some(format!(
                "daily loss cap: pnl {} <= {}",
                state.daily_pnl, daily_floor
            )),
        };
    }

    // 8. Drawdown cap.
    if state.drawdown_pct >= limits.max_drawdown_pct {
        return GateOutcome {
            decision: GateDecision::Rejected {
                reason: format!(
                    "drawdown {} breached cap {}",
                    state.drawdown_pct, limits.max_drawdown_pct
                ),
            },
            halt: Some(format!(
                "drawdown cap: {} >= {}",
                state.drawdown_pct, limits.max_drawdown_pct
            )),
        };
    }

    // 9. Daily trade cap.
    if state.daily_trades >= limits.max_daily_trades {
        return reject(format!(
            "daily trade cap {} reached",
            limits.max_daily_trades
        ));
    }

    // 10. Fee-aware sanity: a declared take-profit must clear 3x the
    // round-trip cost, otherwise the trade can only lose after fees.
    if let Some(take_profit) = signal.take_profit
        && ctx.current_price > Decimal::ZERO
    {
        let entry = signal.limit_price.unwrap_or(ctx.current_price);
        let expected_move = (take_profit - entry).abs() / entry;
        if expected_move < dec!(3) * ctx.round_trip_fee {
            return reject(format!(
                "expected move {} below 3x round-trip fee {}",
                expected_move,
                ctx.round_trip_fee * dec!(3)
            ));
        }
    }

    GateOutcome {
        decision: match shaped {
            Some((size_pct, shaped_from)) => GateDecision::Shaped {
                size_pct,
                shaped_from,
            },
            None => GateDecision::Admitted,
        },
        halt: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Intent;
    use crate::domain::types::OrderType;
    use chrono::Utc;

    fn signal(action: SignalAction, size_pct: Decimal) -> Signal {
        Signal {
            symbol: "BTCUSD".to_string(),
            action,
            size_pct,
            order_type: OrderType::Market,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            intent: Intent::Swing,
            tag: "core".to_string(),
            confidence: dec!(0.8),
            reasoning: "test".to_string(),
        }
    }

    fn state() -> RiskState {
        let now = Utc::now();
        RiskState::new(dec!(1000), now.date_naive(), now)
    }

    fn ctx() -> GateContext {
        GateContext {
            total_value: dec!(1000),
            current_price: dec!(50000),
            existing_notional: Decimal::ZERO,
            position_exists: false,
            open_positions: 0,
            symbol_tradable: true,
            round_trip_fee: dec!(0.008),
        }
    }

    #[test]
    fn clean_buy_admitted() {
        let outcome = evaluate(
            &signal(SignalAction::Buy, dec!(0.05)),
            &RiskLimits::default(),
            &state(),
            &ctx(),
        );
        assert_eq!(outcome.decision, GateDecision::Admitted);
        assert!(outcome.halt.is_none());
    }

    #[test]
    fn oversized_buy_is_shaped_not_rejected() {
        let limits = RiskLimits {
            max_trade_pct: dec!(0.07),
            ..Default::default()
        };
        let outcome = evaluate(&signal(SignalAction::Buy, dec!(0.20)), &limits, &state(), &ctx());
        assert_eq!(
            outcome.decision,
            GateDecision::Shaped {
                size_pct: dec!(0.07),
                shaped_from: dec!(0.20),
            }
        );
    }

    #[test]
    fn shaping_below_notional_floor_rejects() {
        let limits = RiskLimits {
            max_trade_pct: dec!(0.05),
            min_notional_usd: dec!(100),
            ..Default::default()
        };
        // 0.05 * 1000 = 50 < 100 floor
        let outcome = evaluate(&signal(SignalAction::Buy, dec!(0.2)), &limits, &state(), &ctx());
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));
    }

    #[test]
    fn exact_cap_is_admitted_untouched() {
        let limits = RiskLimits {
            max_trade_pct: dec!(0.07),
            ..Default::default()
        };
        let outcome = evaluate(&signal(SignalAction::Buy, dec!(0.07)), &limits, &state(), &ctx());
        assert_eq!(outcome.decision, GateDecision::Admitted);
    }

    #[test]
    fn halted_rejects_buys_but_admits_closes() {
        let mut halted = state();
        halted.status = EngineStatus::Halted;
        halted.halt_reason = Some("daily loss cap".to_string());

        let outcome = evaluate(
            &signal(SignalAction::Buy, dec!(0.05)),
            &RiskLimits::default(),
            &halted,
            &ctx(),
        );
        assert_eq!(
            outcome.decision.rejection_reason(),
            Some("halted: daily loss cap")
        );

        let mut close_ctx = ctx();
        close_ctx.position_exists = true;
        let outcome = evaluate(
            &signal(SignalAction::Close, dec!(1)),
            &RiskLimits::default(),
            &halted,
            &close_ctx,
        );
        assert_eq!(outcome.decision, GateDecision::Admitted);
    }

    #[test]
    fn paused_rejects_entries() {
        let mut paused = state();
        paused.status = EngineStatus::Paused;
        let outcome = evaluate(
            &signal(SignalAction::Buy, dec!(0.05)),
            &RiskLimits::default(),
            &paused,
            &ctx(),
        );
        assert_eq!(outcome.decision.rejection_reason(), Some("paused"));
    }

    #[test]
    fn unknown_symbol_rejected() {
        let mut blocked = ctx();
        blocked.symbol_tradable = false;
        let outcome = evaluate(
            &signal(SignalAction::Buy, dec!(0.05)),
            &RiskLimits::default(),
            &state(),
            &blocked,
        );
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));
    }

    #[test]
    fn position_cap_counts_resulting_notional() {
        let limits = RiskLimits {
            max_position_pct: dec!(0.10),
            max_trade_pct: dec!(0.10),
            ..Default::default()
        };
        let mut has_position = ctx();
        has_position.position_exists = true;
        has_position.existing_notional = dec!(80);
        // 80 + 50 = 130 > 100 cap
        let outcome = evaluate(
            &signal(SignalAction::Buy, dec!(0.05)),
            &limits,
            &state(),
            &has_position,
        );
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));
    }

    #[test]
    fn position_count_cap_only_blocks_new_positions() {
        let limits = RiskLimits {
            max_positions: 2,
            ..Default::default()
        };
        let mut full = ctx();
        full.open_positions = 2;
        let outcome = evaluate(&signal(SignalAction::Buy, dec!(0.05)), &limits, &state(), &full);
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));

        // adding to an existing position is fine
        full.position_exists = true;
        let outcome = evaluate(&signal(SignalAction::Buy, dec!(0.05)), &limits, &state(), &full);
        assert_eq!(outcome.decision, GateDecision::Admitted);
    }

    #[test]
    fn daily_loss_breach_halts() {
        let mut losing = state();
        losing.daily_pnl = dec!(-101); // cap: 10% of 1000
        let outcome = evaluate(
            &signal(SignalAction::Buy, dec!(0.05)),
            &RiskLimits::default(),
            &losing,
            &ctx(),
        );
        assert!(outcome.halt.is_some());
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));
    }

    #[test]
    fn drawdown_breach_halts() {
        let mut deep = state();
        deep.drawdown_pct = dec!(0.25);
        let outcome = evaluate(
            &signal(SignalAction::Buy, dec!(0.05)),
            &RiskLimits::default(),
            &deep,
            &ctx(),
        );
        assert!(outcome.halt.is_some());
    }

    #[test]
    fn daily_trade_cap_rejects_without_halt() {
        let limits = RiskLimits {
            max_daily_trades: 3,
            ..Default::default()
        };
        let mut busy = state();
        busy.daily_trades = 3;
        let outcome = evaluate(&signal(SignalAction::Buy, dec!(0.05)), &limits, &busy, &ctx());
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));
        assert!(outcome.halt.is_none());
    }

    #[test]
    fn thin_take_profit_rejected_by_fee_sanity() {
        let mut thin = signal(SignalAction::Buy, dec!(0.05));
        // 0.2% target against 2.4% fee hurdle (3 x 0.8%)
        thin.take_profit = Some(dec!(50100));
        let outcome = evaluate(&thin, &RiskLimits::default(), &state(), &ctx());
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));

        // exactly 3x round trip admits (tie resolves as admit)
        let mut at_edge = signal(SignalAction::Buy, dec!(0.05));
        at_edge.take_profit = Some(dec!(51200)); // 2.4% of 50000
        let outcome = evaluate(&at_edge, &RiskLimits::default(), &state(), &ctx());
        assert_eq!(outcome.decision, GateDecision::Admitted);
    }

    #[test]
    fn close_without_position_rejected() {
        let outcome = evaluate(
            &signal(SignalAction::Close, dec!(1)),
            &RiskLimits::default(),
            &state(),
            &ctx(),
        );
        assert!(matches!(outcome.decision, GateDecision::Rejected { .. }));
    }
}
