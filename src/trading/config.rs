//! Trading configuration: sizing bounds, exit policy, risk limits,
//! amplifier thresholds.
//!
//! All config structs are immutable once validated. A running bot swaps in
//! a whole new value instead of mutating one in place.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration. Fatal at startup, never surfaced at runtime.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("sizing bounds: min_pct {min} > max_pct {max}")]
    SizingPctInverted { min: Decimal, max: Decimal },

    #[error("sizing bounds: absolute_min {min} > absolute_max {max}")]
    SizingAbsoluteInverted { min: Decimal, max: Decimal },

    #[error("sizing bounds: confidence thresholds {low} >= {high}")]
    ConfidenceThresholdsInverted { low: f64, high: f64 },

    #[error("sizing bounds: {field} must be within (0, 1], got {value}")]
    FractionOutOfRange { field: &'static str, value: Decimal },

    #[error("exit policy: tranche thresholds must be strictly ascending")]
    TranchesNotAscending,

    #[error("exit policy: tranche fractions sum to {sum}, must not exceed 1")]
    TrancheFractionsExceedOne { sum: Decimal },

    #[error("exit policy: {field} must be within (0, 1), got {value}")]
    ExitPctOutOfRange { field: &'static str, value: Decimal },

    #[error("exit policy: max_hold_hours must be positive, got {hours}")]
    NonPositiveHold { hours: i64 },

    #[error("risk limits: {field} must be within (0, 1], got {value}")]
    RiskPctOutOfRange { field: &'static str, value: Decimal },

    #[error("risk limits: max_open_positions must be positive")]
    ZeroPositionCap,
}

/// Bounds for confidence-scaled position sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingBounds {
    /// Fraction of balance at (or below) the low-confidence threshold.
    pub min_pct: Decimal,

    /// Fraction of balance when the confidence model has no opinion.
    pub default_pct: Decimal,

    /// Fraction of balance at (or above) the high-confidence threshold.
    pub max_pct: Decimal,

    /// Confidence at or below which `min_pct` applies.
    pub low_confidence: f64,

    /// Confidence at or above which `max_pct` applies.
    pub high_confidence: f64,

    /// Smallest size worth committing, in base-currency units.
    pub absolute_min: Decimal,

    /// Largest size ever committed to one position.
    pub absolute_max: Decimal,
}

impl Default for SizingBounds {
    fn default() -> Self {
        Self {
            min_pct: dec!(0.03),      // 3% at low confidence
            default_pct: dec!(0.04),  // 4% without a model opinion
            max_pct: dec!(0.05),      // 5% at high confidence
            low_confidence: 0.65,
            high_confidence: 0.85,
            absolute_min: dec!(0.1),
            absolute_max: dec!(2.0),
        }
    }
}

impl SizingBounds {
    /// Validate the bounds. Inverted ranges are a startup error, not
    /// something the sizer deals with per call.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.min_pct > self.max_pct {
            return Err(ConfigError::SizingPctInverted {
                min: self.min_pct,
                max: self.max_pct,
            });
        }
        if self.absolute_min > self.absolute_max {
            return Err(ConfigError::SizingAbsoluteInverted {
                min: self.absolute_min,
                max: self.absolute_max,
            });
        }
        if self.low_confidence >= self.high_confidence {
            return Err(ConfigError::ConfidenceThresholdsInverted {
                low: self.low_confidence,
                high: self.high_confidence,
            });
        }
        for (field, value) in [
            ("min_pct", self.min_pct),
            ("default_pct", self.default_pct),
            ("max_pct", self.max_pct),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(ConfigError::FractionOutOfRange { field, value });
            }
        }
        Ok(self)
    }
}

/// One partial-exit step: sell `exit_fraction` of the original commitment
/// once unrealized gain reaches `profit_threshold_pct`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub profit_threshold_pct: Decimal,
    pub exit_fraction: Decimal,
}

/// Exit rules evaluated by the exit engine each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPolicy {
    /// Full exit when price falls this far below entry.
    pub stop_loss_pct: Decimal,

    /// Partial exits, ascending by threshold, fractions of original size.
    pub tranches: Vec<Tranche>,

    /// Gain since entry at which the trailing stop arms.
    pub trailing_activation_pct: Decimal,

    /// Retracement from the high-water mark that fires the armed trail.
    pub trail_distance_pct: Decimal,

    /// Optional fixed take-profit; ignored once the trail is armed.
    pub take_profit_pct: Option<Decimal>,

    /// Exit everything after holding this long, regardless of price.
    pub max_hold_hours: i64,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(0.05),            // -5% hard stop
            tranches: vec![
                Tranche {
                    profit_threshold_pct: dec!(0.3), // +30%: take a quarter
                    exit_fraction: dec!(0.25),
                },
                Tranche {
                    profit_threshold_pct: dec!(1.0), // +100%: take another quarter
                    exit_fraction: dec!(0.25),
                },
            ],
            trailing_activation_pct: dec!(0.2),   // arm trail at +20%
            trail_distance_pct: dec!(0.1),        // 10% off the peak
            take_profit_pct: None,
            max_hold_hours: 72,
        }
    }
}

impl ExitPolicy {
    pub fn validated(self) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("trailing_activation_pct", self.trailing_activation_pct),
            ("trail_distance_pct", self.trail_distance_pct),
        ] {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                return Err(ConfigError::ExitPctOutOfRange { field, value });
            }
        }
        if let Some(tp) = self.take_profit_pct {
            if tp <= Decimal::ZERO {
                return Err(ConfigError::ExitPctOutOfRange {
                    field: "take_profit_pct",
                    value: tp,
                });
            }
        }

        let mut last = Decimal::MIN;
        let mut fraction_sum = Decimal::ZERO;
        for tranche in &self.tranches {
            if tranche.profit_threshold_pct <= last {
                return Err(ConfigError::TranchesNotAscending);
            }
            last = tranche.profit_threshold_pct;

            if tranche.exit_fraction <= Decimal::ZERO || tranche.exit_fraction > Decimal::ONE {
                return Err(ConfigError::FractionOutOfRange {
                    field: "exit_fraction",
                    value: tranche.exit_fraction,
                });
            }
            fraction_sum += tranche.exit_fraction;
        }
        if fraction_sum > Decimal::ONE {
            return Err(ConfigError::TrancheFractionsExceedOne { sum: fraction_sum });
        }

        if self.max_hold_hours <= 0 {
            return Err(ConfigError::NonPositiveHold {
                hours: self.max_hold_hours,
            });
        }

        Ok(self)
    }

    pub fn max_hold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_hold_hours)
    }
}

/// Portfolio-level risk limits enforced by the risk governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Aggregate daily loss, as a fraction of peak balance, that halts
    /// new entries until the daily reset.
    pub max_daily_loss_pct: Decimal,

    /// Drawdown from peak balance that halts new entries.
    pub max_drawdown_pct: Decimal,

    /// Maximum concurrently open positions.
    pub max_open_positions: usize,

    /// Single-trade loss, as a fraction of peak balance, that trips the
    /// circuit breaker outright.
    pub catastrophic_loss_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: dec!(0.05),    // stop for the day at -5%
            max_drawdown_pct: dec!(0.20),      // stop at 20% off peak
            max_open_positions: 5,
            catastrophic_loss_pct: dec!(0.10), // one -10% trade trips the breaker
        }
    }
}

impl RiskLimits {
    pub fn validated(self) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("catastrophic_loss_pct", self.catastrophic_loss_pct),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(ConfigError::RiskPctOutOfRange { field, value });
            }
        }
        if self.max_open_positions == 0 {
            return Err(ConfigError::ZeroPositionCap);
        }
        Ok(self)
    }
}

/// Thresholds for winner amplification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplifierConfig {
    /// Minimum unrealized gain before a scale-up is considered.
    pub scale_up_min_gain: Decimal,

    /// Minimum momentum score for a scale-up.
    pub scale_up_min_momentum: f64,

    /// Maximum drawdown from peak tolerated for a scale-up.
    pub scale_up_max_drawdown: Decimal,

    /// Positions older than this are not scaled up.
    pub scale_up_max_age_days: i64,

    /// Gain past which a position counts as a super winner and is never
    /// scaled further.
    pub super_winner_gain: Decimal,

    /// Additional commitment on scale-up, as a fraction of current size.
    pub scale_up_fraction: Decimal,

    /// Exit advisory: drawdown from peak that gives back too much...
    pub exit_drawdown_from_peak: Decimal,

    /// ...provided the peak gain had exceeded this much.
    pub exit_min_peak_gain: Decimal,

    /// Exit advisory: momentum below this while gain exceeds
    /// `exit_min_gain` means the run is fading.
    pub exit_max_momentum: f64,
    pub exit_min_gain: Decimal,

    /// Exit advisory: super winners older than this have run their course.
    pub super_winner_max_age_days: i64,

    /// Closed winners with at least this gain feed the learned profile.
    pub big_winner_gain: Decimal,

    /// How many closed winners to keep in the rolling window.
    pub winner_window: usize,

    /// A candidate matches the learned profile when it shows at least this
    /// many signals seen in at least `pattern_min_frequency` of big winners.
    pub pattern_min_signals: usize,
    pub pattern_min_frequency: f64,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            scale_up_min_gain: dec!(0.30),
            scale_up_min_momentum: 0.7,
            scale_up_max_drawdown: dec!(0.10),
            scale_up_max_age_days: 7,
            super_winner_gain: dec!(1.0),
            scale_up_fraction: dec!(0.5),
            exit_drawdown_from_peak: dec!(0.20),
            exit_min_peak_gain: dec!(0.50),
            exit_max_momentum: 0.3,
            exit_min_gain: dec!(0.50),
            super_winner_max_age_days: 14,
            big_winner_gain: dec!(0.50),
            winner_window: 50,
            pattern_min_signals: 2,
            pattern_min_frequency: 0.6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SizingBounds::default().validated().is_ok());
        assert!(ExitPolicy::default().validated().is_ok());
        assert!(RiskLimits::default().validated().is_ok());
    }

    #[test]
    fn test_inverted_sizing_pcts_rejected() {
        let bounds = SizingBounds {
            min_pct: dec!(0.06),
            max_pct: dec!(0.05),
            ..Default::default()
        };
        assert_eq!(
            bounds.validated(),
            Err(ConfigError::SizingPctInverted {
                min: dec!(0.06),
                max: dec!(0.05),
            })
        );
    }

    #[test]
    fn test_unsorted_tranches_rejected() {
        let policy = ExitPolicy {
            tranches: vec![
                Tranche {
                    profit_threshold_pct: dec!(1.0),
                    exit_fraction: dec!(0.25),
                },
                Tranche {
                    profit_threshold_pct: dec!(0.3),
                    exit_fraction: dec!(0.25),
                },
            ],
            ..Default::default()
        };
        assert_eq!(policy.validated(), Err(ConfigError::TranchesNotAscending));
    }

    #[test]
    fn test_oversold_tranches_rejected() {
        let policy = ExitPolicy {
            tranches: vec![
                Tranche {
                    profit_threshold_pct: dec!(0.3),
                    exit_fraction: dec!(0.6),
                },
                Tranche {
                    profit_threshold_pct: dec!(1.0),
                    exit_fraction: dec!(0.6),
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            policy.validated(),
            Err(ConfigError::TrancheFractionsExceedOne { sum: dec!(1.2) })
        );
    }

    #[test]
    fn test_zero_position_cap_rejected() {
        let limits = RiskLimits {
            max_open_positions: 0,
            ..Default::default()
        };
        assert_eq!(limits.validated(), Err(ConfigError::ZeroPositionCap));
    }
}
