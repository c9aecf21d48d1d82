//! Portfolio-level risk governance: daily loss cap, drawdown cap, open
//! position cap, and the circuit-breaker latch.
//!
//! The governor gates NEW entries only. Exit evaluation always proceeds,
//! whatever the gate says; leaving losing positions open during a block
//! would be worse than the block itself.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::TradeOutcome;

use super::config::RiskLimits;

/// Process-wide risk state, owned by the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    /// Current tracked balance. The core tracks this itself rather than
    /// reading it back from the ledger mid-cycle.
    pub balance: Decimal,

    /// Monotone maximum of observed balances.
    pub peak_balance: Decimal,

    /// Losses (only) accumulated since the last daily reset, positive.
    pub daily_loss: Decimal,

    /// Closed trades since the last daily reset.
    pub daily_trade_count: u32,

    /// Currently open positions.
    pub open_position_count: usize,

    /// Latched on catastrophic loss; blocks all new entries, including
    /// exit-triggered re-entries, until manually cleared.
    pub circuit_breaker_tripped: bool,

    /// When daily counters were last reset.
    pub last_daily_reset: DateTime<Utc>,
}

impl RiskState {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            balance: starting_balance,
            peak_balance: starting_balance,
            daily_loss: Decimal::ZERO,
            daily_trade_count: 0,
            open_position_count: 0,
            circuit_breaker_tripped: false,
            last_daily_reset: Utc::now(),
        }
    }
}

/// Why the gate refused a new entry. Expected control flow, not a failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskBlock {
    #[error("circuit breaker tripped; manual reset required")]
    CircuitBreakerTripped,

    #[error("daily loss {loss_pct} of peak balance >= limit {max}")]
    DailyLossExceeded { loss_pct: Decimal, max: Decimal },

    #[error("drawdown {drawdown_pct} from peak balance >= limit {max}")]
    MaxDrawdownExceeded { drawdown_pct: Decimal, max: Decimal },

    #[error("open positions {open} >= limit {max}")]
    MaxPositionsReached { open: usize, max: usize },
}

/// Enforces the configured risk limits against the loop-owned state.
pub struct RiskGovernor {
    limits: RiskLimits,
}

impl RiskGovernor {
    /// Create a governor from validated limits.
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// May a new entry be opened right now?
    pub fn gate(&self, risk: &RiskState) -> Result<(), RiskBlock> {
        if risk.circuit_breaker_tripped {
            return Err(RiskBlock::CircuitBreakerTripped);
        }

        if risk.peak_balance > Decimal::ZERO {
            let loss_pct = risk.daily_loss / risk.peak_balance;
            if loss_pct >= self.limits.max_daily_loss_pct {
                return Err(RiskBlock::DailyLossExceeded {
                    loss_pct,
                    max: self.limits.max_daily_loss_pct,
                });
            }

            let drawdown_pct =
                (risk.peak_balance - risk.balance).max(Decimal::ZERO) / risk.peak_balance;
            if drawdown_pct >= self.limits.max_drawdown_pct {
                return Err(RiskBlock::MaxDrawdownExceeded {
                    drawdown_pct,
                    max: self.limits.max_drawdown_pct,
                });
            }
        }

        if risk.open_position_count >= self.limits.max_open_positions {
            return Err(RiskBlock::MaxPositionsReached {
                open: risk.open_position_count,
                max: self.limits.max_open_positions,
            });
        }

        Ok(())
    }

    /// Fold a closed trade into the risk state.
    pub fn record(&self, risk: &mut RiskState, outcome: &TradeOutcome) {
        risk.daily_trade_count += 1;
        self.observe_balance(risk, outcome.balance_after);

        if outcome.realized_pnl < Decimal::ZERO {
            let loss = -outcome.realized_pnl;
            risk.daily_loss += loss;

            if risk.peak_balance > Decimal::ZERO
                && loss / risk.peak_balance >= self.limits.catastrophic_loss_pct
            {
                error!(
                    asset = %outcome.asset_id,
                    loss = %loss,
                    peak = %risk.peak_balance,
                    "Catastrophic single-trade loss, tripping circuit breaker"
                );
                risk.circuit_breaker_tripped = true;
            }
        }
    }

    /// Track the current balance; the peak only moves up.
    pub fn observe_balance(&self, risk: &mut RiskState, balance: Decimal) {
        risk.balance = balance;
        if balance > risk.peak_balance {
            risk.peak_balance = balance;
        }
    }

    /// Zero the daily counters when a new UTC day has started. Calling
    /// twice in the same day is a no-op.
    pub fn maybe_reset_daily(&self, risk: &mut RiskState, now: DateTime<Utc>) {
        if now.date_naive() > risk.last_daily_reset.date_naive() {
            info!(
                previous_loss = %risk.daily_loss,
                previous_trades = risk.daily_trade_count,
                "Daily risk counters reset"
            );
            risk.daily_loss = Decimal::ZERO;
            risk.daily_trade_count = 0;
            risk.last_daily_reset = now;
        }
    }

    /// Emergency stop: latch the breaker manually.
    pub fn trip_circuit_breaker(&self, risk: &mut RiskState) {
        warn!("Circuit breaker tripped manually");
        risk.circuit_breaker_tripped = true;
    }

    /// Operator action: clear the latch and allow entries again.
    pub fn reset_circuit_breaker(&self, risk: &mut RiskState) {
        info!("Circuit breaker reset");
        risk.circuit_breaker_tripped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;
    use rust_decimal_macros::dec;

    fn governor() -> RiskGovernor {
        RiskGovernor::new(RiskLimits::default().validated().unwrap())
    }

    fn outcome(pnl: Decimal, balance_after: Decimal) -> TradeOutcome {
        TradeOutcome {
            id: "test".to_string(),
            asset_id: "MINT1".to_string(),
            entered_at: Utc::now(),
            closed_at: Utc::now(),
            entry_price: dec!(1.0),
            exit_price: dec!(1.0),
            committed_size: dec!(10),
            realized_pnl: pnl,
            reason: ExitReason::StopLoss,
            balance_after,
        }
    }

    #[test]
    fn test_gate_open_on_fresh_state() {
        let risk = RiskState::new(dec!(100));
        assert!(governor().gate(&risk).is_ok());
    }

    #[test]
    fn test_daily_loss_boundary() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        risk.daily_loss = dec!(4.9);
        assert!(gov.gate(&risk).is_ok());

        // One more loss of 0.2 pushes 4.9 -> 5.1, at/over the 5% limit.
        gov.record(&mut risk, &outcome(dec!(-0.2), dec!(95)));
        assert!(matches!(
            gov.gate(&risk),
            Err(RiskBlock::DailyLossExceeded { .. })
        ));
    }

    #[test]
    fn test_drawdown_block() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        gov.observe_balance(&mut risk, dec!(79));
        assert!(matches!(
            gov.gate(&risk),
            Err(RiskBlock::MaxDrawdownExceeded { .. })
        ));

        gov.observe_balance(&mut risk, dec!(81));
        assert!(gov.gate(&risk).is_ok());
    }

    #[test]
    fn test_position_cap_block() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        risk.open_position_count = 5;
        assert_eq!(
            gov.gate(&risk),
            Err(RiskBlock::MaxPositionsReached { open: 5, max: 5 })
        );
    }

    #[test]
    fn test_breaker_blocks_until_explicit_reset() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        gov.trip_circuit_breaker(&mut risk);

        // Everything else healthy; the latch still wins, repeatedly.
        for _ in 0..3 {
            assert_eq!(gov.gate(&risk), Err(RiskBlock::CircuitBreakerTripped));
        }

        gov.reset_circuit_breaker(&mut risk);
        assert!(gov.gate(&risk).is_ok());
    }

    #[test]
    fn test_catastrophic_single_loss_trips_breaker() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        // -10 on a 100 peak meets the 10% catastrophic threshold.
        gov.record(&mut risk, &outcome(dec!(-10), dec!(90)));
        assert!(risk.circuit_breaker_tripped);
        assert_eq!(gov.gate(&risk), Err(RiskBlock::CircuitBreakerTripped));
    }

    #[test]
    fn test_small_losses_do_not_trip_breaker() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        gov.record(&mut risk, &outcome(dec!(-2), dec!(98)));
        assert!(!risk.circuit_breaker_tripped);
        assert_eq!(risk.daily_loss, dec!(2));
    }

    #[test]
    fn test_peak_balance_is_monotone() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        gov.observe_balance(&mut risk, dec!(120));
        gov.observe_balance(&mut risk, dec!(110));
        assert_eq!(risk.peak_balance, dec!(120));
        assert_eq!(risk.balance, dec!(110));
    }

    #[test]
    fn test_wins_do_not_accumulate_daily_loss() {
        let gov = governor();
        let mut risk = RiskState::new(dec!(100));

        gov.record(&mut risk, &outcome(dec!(5), dec!(105)));
        assert_eq!(risk.daily_loss, dec!(0));
        assert_eq!(risk.daily_trade_count, 1);
    }

    #[test]
    fn test_daily_reset_is_idempotent() {
        use chrono::TimeZone;

        let gov = governor();
        let mut risk = RiskState::new(dec!(100));
        risk.daily_loss = dec!(3);
        risk.daily_trade_count = 4;

        let noon = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        risk.last_daily_reset = noon - chrono::Duration::days(1);

        gov.maybe_reset_daily(&mut risk, noon);
        assert_eq!(risk.daily_loss, dec!(0));
        assert_eq!(risk.daily_trade_count, 0);

        // Same day again: nothing changes.
        risk.daily_loss = dec!(1);
        gov.maybe_reset_daily(&mut risk, noon + chrono::Duration::hours(1));
        assert_eq!(risk.daily_loss, dec!(1));
    }
}
