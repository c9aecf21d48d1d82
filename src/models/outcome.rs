//! Closed-trade outcome records fed back into risk and winner analysis.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a position (or part of one) was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Price fell through the stop-loss level.
    StopLoss,
    /// A configured profit tranche fired.
    ProfitTranche,
    /// Retracement from the high-water mark while the trail was armed.
    TrailingStop,
    /// Fixed take-profit target reached.
    TakeProfit,
    /// Maximum hold duration elapsed.
    TimeExpired,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::ProfitTranche => "profit_tranche",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TimeExpired => "time_expired",
        }
    }
}

/// Record of a fully closed position.
///
/// Produced by the control loop when a position's remaining fraction
/// reaches zero, appended to the ledger and reported to the risk governor
/// and winner amplifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    /// Unique record id.
    pub id: String,

    /// Asset the position was held in.
    pub asset_id: String,

    /// When the position was opened.
    pub entered_at: DateTime<Utc>,

    /// When the final exit fired.
    pub closed_at: DateTime<Utc>,

    /// Cost-weighted average entry price.
    pub entry_price: Decimal,

    /// Price of the final closing action.
    pub exit_price: Decimal,

    /// Total capital committed over the position's life.
    pub committed_size: Decimal,

    /// Realized P&L across all partial and final exits.
    pub realized_pnl: Decimal,

    /// Reason of the final closing action.
    pub reason: ExitReason,

    /// Account balance after settlement.
    pub balance_after: Decimal,
}

impl TradeOutcome {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }

    /// Realized return relative to committed capital.
    pub fn return_pct(&self) -> Decimal {
        if self.committed_size.is_zero() {
            return Decimal::ZERO;
        }
        self.realized_pnl / self.committed_size
    }

    pub fn held_for(&self) -> chrono::Duration {
        self.closed_at - self.entered_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_return_pct() {
        let outcome = TradeOutcome {
            id: "test".to_string(),
            asset_id: "MINT1".to_string(),
            entered_at: Utc::now(),
            closed_at: Utc::now(),
            entry_price: dec!(1.0),
            exit_price: dec!(1.5),
            committed_size: dec!(100),
            realized_pnl: dec!(50),
            reason: ExitReason::TakeProfit,
            balance_after: dec!(1050),
        };

        assert!(outcome.is_win());
        assert_eq!(outcome.return_pct(), dec!(0.5));
    }

    #[test]
    fn test_zero_size_has_zero_return() {
        let outcome = TradeOutcome {
            id: "test".to_string(),
            asset_id: "MINT1".to_string(),
            entered_at: Utc::now(),
            closed_at: Utc::now(),
            entry_price: dec!(1.0),
            exit_price: dec!(0.9),
            committed_size: dec!(0),
            realized_pnl: dec!(0),
            reason: ExitReason::StopLoss,
            balance_after: dec!(1000),
        };

        assert_eq!(outcome.return_pct(), dec!(0));
    }
}
