//! Position model: one open or closed commitment to a tradable asset.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    /// Open, trailing stop not yet armed.
    Open,
    /// Open, trailing stop armed after the activation gain was reached.
    TrailingArmed,
    /// Fully exited.
    Closed,
}

/// A commitment to one tradable asset.
///
/// The control loop's position table holds at most one open position per
/// asset id. Only the exit engine mutates exit bookkeeping, and only the
/// loop applies scale-ups recommended by the winner amplifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Asset identifier (mint address, ticker, ...).
    pub asset_id: String,

    /// When the position was opened.
    pub entry_time: DateTime<Utc>,

    /// Cost-weighted average entry price.
    pub entry_price: Decimal,

    /// Total committed capital in base-currency units. Grows on scale-up.
    pub committed_size: Decimal,

    /// Fraction of the commitment still held, in [0, 1]. Never increases.
    pub remaining_fraction: Decimal,

    /// High-water mark since entry. Never decreases while open.
    pub highest_price_seen: Decimal,

    /// Profit thresholds whose tranche has already fired.
    pub exit_levels_consumed: BTreeSet<Decimal>,

    /// P&L realized so far across partial and final exits.
    pub realized_pnl: Decimal,

    /// Lifecycle state.
    pub state: PositionState,
}

impl Position {
    /// Open a new position.
    pub fn open(
        asset_id: String,
        entry_price: Decimal,
        committed_size: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            asset_id,
            entry_time,
            entry_price,
            committed_size,
            remaining_fraction: Decimal::ONE,
            highest_price_seen: entry_price,
            exit_levels_consumed: BTreeSet::new(),
            realized_pnl: Decimal::ZERO,
            state: PositionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state != PositionState::Closed
    }

    /// Unrealized gain fraction at `price` relative to the entry price.
    pub fn gain_at(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price
    }

    /// Best gain fraction seen since entry.
    pub fn peak_gain(&self) -> Decimal {
        self.gain_at(self.highest_price_seen)
    }

    /// Fractional decline from the high-water mark at `price`.
    pub fn drawdown_from_peak(&self, price: Decimal) -> Decimal {
        if self.highest_price_seen.is_zero() {
            return Decimal::ZERO;
        }
        ((self.highest_price_seen - price) / self.highest_price_seen).max(Decimal::ZERO)
    }

    /// Ratchet the high-water mark. The mark only moves up.
    pub fn observe_price(&mut self, price: Decimal) {
        if price > self.highest_price_seen {
            self.highest_price_seen = price;
        }
    }

    /// Market value of the remaining holding at `price`.
    pub fn remaining_value_at(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.remaining_fraction * self.committed_size * (price / self.entry_price)
    }

    /// How long the position has been held as of `now`.
    pub fn held_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.entry_time
    }

    /// Reduce the holding by `fraction` of the commitment, selling at
    /// `price`. Returns the realized P&L of the slice. The fraction is
    /// clamped to what remains; reaching zero closes the position.
    pub fn reduce(&mut self, fraction: Decimal, price: Decimal) -> Decimal {
        let sold = fraction.min(self.remaining_fraction).max(Decimal::ZERO);
        let cost = sold * self.committed_size;
        let proceeds = if self.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            cost * (price / self.entry_price)
        };

        self.remaining_fraction -= sold;
        if self.remaining_fraction <= Decimal::ZERO {
            self.remaining_fraction = Decimal::ZERO;
            self.state = PositionState::Closed;
        }

        let pnl = proceeds - cost;
        self.realized_pnl += pnl;
        pnl
    }

    /// Synthetic additional entry: commit `size` more at `price`, averaging
    /// the entry price across old and new cost.
    pub fn scale_up(&mut self, size: Decimal, price: Decimal) {
        if size <= Decimal::ZERO || price <= Decimal::ZERO || self.entry_price.is_zero() {
            return;
        }

        let old_units = self.committed_size / self.entry_price;
        let new_units = size / price;

        self.committed_size += size;
        self.entry_price = self.committed_size / (old_units + new_units);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(entry: Decimal, size: Decimal) -> Position {
        Position::open("MINT1".to_string(), entry, size, Utc::now())
    }

    #[test]
    fn test_gain_and_drawdown() {
        let mut pos = make_position(dec!(1.0), dec!(100));

        pos.observe_price(dec!(2.0));
        assert_eq!(pos.peak_gain(), dec!(1.0));
        assert_eq!(pos.gain_at(dec!(1.5)), dec!(0.5));
        assert_eq!(pos.drawdown_from_peak(dec!(1.5)), dec!(0.25));
    }

    #[test]
    fn test_high_water_mark_never_decreases() {
        let mut pos = make_position(dec!(1.0), dec!(100));

        pos.observe_price(dec!(1.8));
        pos.observe_price(dec!(1.2));
        assert_eq!(pos.highest_price_seen, dec!(1.8));
    }

    #[test]
    fn test_reduce_realizes_pnl_and_closes_at_zero() {
        let mut pos = make_position(dec!(1.0), dec!(100));

        // Sell a quarter at +50%: cost 25, proceeds 37.5
        let pnl = pos.reduce(dec!(0.25), dec!(1.5));
        assert_eq!(pnl, dec!(12.5));
        assert_eq!(pos.remaining_fraction, dec!(0.75));
        assert!(pos.is_open());

        // Sell the rest at entry price: no further P&L
        let pnl = pos.reduce(dec!(0.75), dec!(1.0));
        assert_eq!(pnl, dec!(0));
        assert_eq!(pos.remaining_fraction, dec!(0));
        assert_eq!(pos.state, PositionState::Closed);
    }

    #[test]
    fn test_reduce_clamps_to_remaining() {
        let mut pos = make_position(dec!(1.0), dec!(100));

        pos.reduce(dec!(0.8), dec!(1.0));
        // Asking for more than remains sells only what is left
        pos.reduce(dec!(0.5), dec!(1.0));
        assert_eq!(pos.remaining_fraction, dec!(0));
        assert_eq!(pos.state, PositionState::Closed);
    }

    #[test]
    fn test_scale_up_averages_entry() {
        let mut pos = make_position(dec!(0.50), dec!(50));

        // 50 committed at 0.50 is 100 units; adding 60 at 0.60 is 100 more
        pos.scale_up(dec!(60), dec!(0.60));

        assert_eq!(pos.committed_size, dec!(110));
        assert_eq!(pos.entry_price, dec!(0.55));
    }
}
