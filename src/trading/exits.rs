//! Exit engine: a per-position state machine over stop-loss, profit
//! tranches, trailing stop, take-profit, and time stop.
//!
//! Rules are evaluated in fixed precedence order each cycle. Capital
//! preservation comes first: the stop-loss always wins over profit-taking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::models::{ExitReason, Position, PositionState};

use super::config::ExitPolicy;

/// One exit applied to a position this cycle. `fraction` is measured
/// against the original commitment, already clamped to what remained.
#[derive(Debug, Clone)]
pub struct ExitAction {
    pub asset_id: String,
    pub fraction: Decimal,
    pub reason: ExitReason,

    /// Realized P&L of the slice.
    pub realized_pnl: Decimal,

    /// Sale proceeds of the slice, credited back to the balance.
    pub proceeds: Decimal,
}

/// Evaluates exit rules for open positions.
pub struct ExitEngine {
    policy: ExitPolicy,
}

impl ExitEngine {
    /// Create an engine from a validated policy.
    pub fn new(policy: ExitPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExitPolicy {
        &self.policy
    }

    /// Evaluate one position against this cycle's price.
    ///
    /// Multiple tranches may fire in a single call when the price jumped
    /// past several thresholds; they fire in ascending threshold order and
    /// each threshold is consumed exactly once. Reaching a remaining
    /// fraction of zero closes the position.
    ///
    /// The caller resolves price-feed failures before calling: a position
    /// without a usable quote is skipped for the cycle, never evaluated
    /// against stale or zero data.
    pub fn evaluate(
        &self,
        position: &mut Position,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<ExitAction> {
        if !position.is_open() || price <= Decimal::ZERO {
            return Vec::new();
        }

        position.observe_price(price);
        let gain = position.gain_at(price);
        let mut actions = Vec::new();

        // 1. Stop-loss: full exit, highest precedence.
        let stop_level = position.entry_price * (Decimal::ONE - self.policy.stop_loss_pct);
        if price <= stop_level {
            warn!(
                asset = %position.asset_id,
                price = %price,
                stop = %stop_level,
                "Stop-loss triggered"
            );
            actions.push(self.exit_all(position, price, ExitReason::StopLoss));
            return actions;
        }

        // 2. Profit tranches, ascending, against the original commitment.
        for tranche in &self.policy.tranches {
            if position.remaining_fraction.is_zero() {
                break;
            }
            if position
                .exit_levels_consumed
                .contains(&tranche.profit_threshold_pct)
            {
                continue;
            }
            if gain < tranche.profit_threshold_pct {
                break;
            }

            position
                .exit_levels_consumed
                .insert(tranche.profit_threshold_pct);

            let fraction = tranche.exit_fraction.min(position.remaining_fraction);
            let cost = fraction * position.committed_size;
            let pnl = position.reduce(fraction, price);

            info!(
                asset = %position.asset_id,
                threshold = %tranche.profit_threshold_pct,
                fraction = %fraction,
                remaining = %position.remaining_fraction,
                "Profit tranche fired"
            );

            actions.push(ExitAction {
                asset_id: position.asset_id.clone(),
                fraction,
                reason: ExitReason::ProfitTranche,
                realized_pnl: pnl,
                proceeds: cost + pnl,
            });
        }
        if !position.is_open() {
            return actions;
        }

        // 3. Trailing stop: arm on the activation gain, fire on
        //    retracement from the high-water mark.
        if position.state == PositionState::Open && gain >= self.policy.trailing_activation_pct {
            position.state = PositionState::TrailingArmed;
            debug!(
                asset = %position.asset_id,
                gain = %gain,
                "Trailing stop armed"
            );
        }
        if position.state == PositionState::TrailingArmed {
            let trail_level =
                position.highest_price_seen * (Decimal::ONE - self.policy.trail_distance_pct);
            if price <= trail_level {
                info!(
                    asset = %position.asset_id,
                    price = %price,
                    peak = %position.highest_price_seen,
                    "Trailing stop fired"
                );
                actions.push(self.exit_all(position, price, ExitReason::TrailingStop));
                return actions;
            }
        }

        // 4. Fixed take-profit, only while no trail is armed.
        if position.state == PositionState::Open {
            if let Some(tp) = self.policy.take_profit_pct {
                if gain >= tp {
                    info!(
                        asset = %position.asset_id,
                        gain = %gain,
                        target = %tp,
                        "Take-profit reached"
                    );
                    actions.push(self.exit_all(position, price, ExitReason::TakeProfit));
                    return actions;
                }
            }
        }

        // 5. Time stop: exit regardless of price.
        if position.held_for(now) > self.policy.max_hold() {
            info!(
                asset = %position.asset_id,
                held_hours = position.held_for(now).num_hours(),
                "Max hold duration elapsed"
            );
            actions.push(self.exit_all(position, price, ExitReason::TimeExpired));
        }

        actions
    }

    fn exit_all(&self, position: &mut Position, price: Decimal, reason: ExitReason) -> ExitAction {
        let fraction = position.remaining_fraction;
        let cost = fraction * position.committed_size;
        let pnl = position.reduce(fraction, price);

        ExitAction {
            asset_id: position.asset_id.clone(),
            fraction,
            reason,
            realized_pnl: pnl,
            proceeds: cost + pnl,
        }
    }
}
