//! Position sizing: scale the committed fraction of balance with the
//! confidence score, inside hard bounds.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use super::config::SizingBounds;
use super::risk::RiskState;

/// Sizing outcome handed to the order path.
#[derive(Debug, Clone)]
pub struct SizingDecision {
    pub asset_id: String,
    pub size: Decimal,
}

/// Sizing refusals. These are values, not failures; the caller simply does
/// not open the position.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SizeError {
    #[error("balance {balance} is not positive")]
    InsufficientBalance { balance: Decimal },

    #[error("confidence {value} outside [0, 1]")]
    InvalidConfidence { value: f64 },

    #[error("circuit breaker tripped, no new entries are sized")]
    TradingHalted,
}

/// Calculator for committed position sizes.
pub struct PositionSizer {
    bounds: SizingBounds,
}

impl PositionSizer {
    /// Create a sizer from validated bounds.
    pub fn new(bounds: SizingBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &SizingBounds {
        &self.bounds
    }

    /// Compute the size to commit for a new entry.
    ///
    /// The fraction of balance interpolates linearly between `min_pct` and
    /// `max_pct` across the confidence band; no opinion means the default
    /// fraction. The result is clamped into the absolute bounds and never
    /// exceeds the available balance.
    pub fn size(
        &self,
        balance: Decimal,
        confidence: Option<f64>,
        risk: &RiskState,
    ) -> Result<Decimal, SizeError> {
        if risk.circuit_breaker_tripped {
            return Err(SizeError::TradingHalted);
        }
        if balance <= Decimal::ZERO {
            return Err(SizeError::InsufficientBalance { balance });
        }

        let fraction = match confidence {
            None => self.bounds.default_pct,
            Some(c) => self.confidence_fraction(c)?,
        };

        let size = (balance * fraction)
            .clamp(self.bounds.absolute_min, self.bounds.absolute_max)
            .min(balance);

        debug!(
            balance = %balance,
            confidence = ?confidence,
            fraction = %fraction,
            size = %size,
            "Sized new entry"
        );

        Ok(size)
    }

    /// Map a confidence score onto the [min_pct, max_pct] band.
    fn confidence_fraction(&self, confidence: f64) -> Result<Decimal, SizeError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(SizeError::InvalidConfidence { value: confidence });
        }

        let low = self.bounds.low_confidence;
        let high = self.bounds.high_confidence;

        if confidence <= low {
            return Ok(self.bounds.min_pct);
        }
        if confidence >= high {
            return Ok(self.bounds.max_pct);
        }

        let t = Decimal::try_from((confidence - low) / (high - low))
            .map_err(|_| SizeError::InvalidConfidence { value: confidence })?;
        Ok(self.bounds.min_pct + (self.bounds.max_pct - self.bounds.min_pct) * t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> PositionSizer {
        let bounds = SizingBounds::default().validated().unwrap();
        PositionSizer::new(bounds)
    }

    #[test]
    fn test_high_confidence_uses_max_pct() {
        let size = sizer()
            .size(dec!(10.0), Some(0.85), &RiskState::new(dec!(10.0)))
            .unwrap();
        assert_eq!(size, dec!(0.5)); // 10 * 5%
    }

    #[test]
    fn test_low_confidence_uses_min_pct() {
        let size = sizer()
            .size(dec!(100.0), Some(0.60), &RiskState::new(dec!(100.0)))
            .unwrap();
        assert_eq!(size, dec!(2.0)); // 100 * 3% = 3, capped at absolute_max
    }

    #[test]
    fn test_no_opinion_uses_default_pct() {
        let size = sizer()
            .size(dec!(10.0), None, &RiskState::new(dec!(10.0)))
            .unwrap();
        assert_eq!(size, dec!(0.4)); // 10 * 4%
    }

    #[test]
    fn test_midband_confidence_interpolates() {
        let size = sizer()
            .size(dec!(10.0), Some(0.75), &RiskState::new(dec!(10.0)))
            .unwrap();
        // Halfway between 3% and 5%, modulo float rounding in the band math.
        assert!((size - dec!(0.4)).abs() < dec!(0.0000001));
    }

    #[test]
    fn test_confidence_outside_unit_interval_rejected() {
        let risk = RiskState::new(dec!(10.0));
        assert_eq!(
            sizer().size(dec!(10.0), Some(1.5), &risk),
            Err(SizeError::InvalidConfidence { value: 1.5 })
        );
        assert_eq!(
            sizer().size(dec!(10.0), Some(-0.1), &risk),
            Err(SizeError::InvalidConfidence { value: -0.1 })
        );
    }

    #[test]
    fn test_non_positive_balance_rejected() {
        let risk = RiskState::new(dec!(10.0));
        assert_eq!(
            sizer().size(dec!(0), None, &risk),
            Err(SizeError::InsufficientBalance { balance: dec!(0) })
        );
    }

    #[test]
    fn test_size_never_exceeds_balance() {
        // Absolute minimum would oversize a tiny balance; the balance wins.
        let size = sizer()
            .size(dec!(0.05), Some(0.9), &RiskState::new(dec!(0.05)))
            .unwrap();
        assert_eq!(size, dec!(0.05));
    }

    #[test]
    fn test_absolute_bounds_applied() {
        let risk = RiskState::new(dec!(1000.0));

        // 1000 * 5% = 50, capped at absolute_max 2.0
        let size = sizer().size(dec!(1000.0), Some(0.9), &risk).unwrap();
        assert_eq!(size, dec!(2.0));

        // 1 * 3% = 0.03, floored at absolute_min 0.1
        let size = sizer().size(dec!(1.0), Some(0.1), &risk).unwrap();
        assert_eq!(size, dec!(0.1));
    }

    #[test]
    fn test_tripped_breaker_refuses_to_size() {
        let mut risk = RiskState::new(dec!(10.0));
        risk.circuit_breaker_tripped = true;

        assert_eq!(
            sizer().size(dec!(10.0), Some(0.9), &risk),
            Err(SizeError::TradingHalted)
        );
    }
}
