//! Winner amplification: watch open winners for scale-up or fade-out, and
//! learn which signals the big winners had in common.
//!
//! Everything here is advisory. The control loop decides whether to act on
//! a recommendation; the amplifier never touches the exit engine or the
//! sizer.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;
use tracing::debug;

use crate::feed::PriceQuote;
use crate::models::{Position, TradeOutcome};

use super::config::AmplifierConfig;

const SIG_FAST_RUNNER: &str = "fast_runner";
const SIG_SHORT_MOMENTUM: &str = "strong_short_momentum";
const SIG_SUSTAINED_MOMENTUM: &str = "sustained_momentum";
const SIG_ELEVATED_VOLUME: &str = "elevated_volume";

/// Big-winner observations needed before profile matching activates.
const MIN_BIG_WINNERS: u32 = 3;

/// What the amplifier recommends for one asset.
#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationKind {
    /// Commit more to a running winner.
    ScaleUp { additional_size: Decimal },
    /// The run looks spent; exit ahead of the engine's rules.
    EarlyExit,
    /// A candidate matches the learned big-winner profile.
    NewEntry,
}

/// Advisory output consumed by the control loop.
#[derive(Debug, Clone)]
pub struct AmplifierRecommendation {
    pub asset_id: String,
    pub kind: RecommendationKind,
    pub rationale: String,
}

/// Per-cycle snapshot of one open winner. Derived, never stored.
#[derive(Debug, Clone)]
pub struct WinnerProfile {
    pub gain: Decimal,
    pub peak_gain: Decimal,
    pub drawdown_from_peak: Decimal,
    pub momentum: Option<f64>,
    pub held: chrono::Duration,
    pub super_winner: bool,
}

/// Frequency of one signal among observed big winners.
#[derive(Debug, Clone)]
pub struct HistoricalPattern {
    pub signal: String,
    pub frequency: f64,
}

/// Aggregate statistics over the rolling winner window.
#[derive(Debug, Clone)]
pub struct WinnerStats {
    pub winners: usize,
    pub big_winners: u32,
    pub mean_return: f64,
    pub return_std: f64,
}

/// Analyzer of open winners and historical winner patterns.
pub struct WinnerAmplifier {
    config: AmplifierConfig,
    closed_winners: VecDeque<TradeOutcome>,
    big_winner_count: u32,
    pattern_hits: HashMap<&'static str, u32>,
}

impl WinnerAmplifier {
    pub fn new(config: AmplifierConfig) -> Self {
        Self {
            config,
            closed_winners: VecDeque::new(),
            big_winner_count: 0,
            pattern_hits: HashMap::new(),
        }
    }

    /// Build the derived profile for an open position at this cycle's
    /// quote.
    pub fn profile(
        &self,
        position: &Position,
        quote: &PriceQuote,
        now: DateTime<Utc>,
    ) -> WinnerProfile {
        let gain = position.gain_at(quote.price);
        WinnerProfile {
            gain,
            peak_gain: position.peak_gain(),
            drawdown_from_peak: position.drawdown_from_peak(quote.price),
            momentum: momentum_score(quote),
            held: position.held_for(now),
            super_winner: gain > self.config.super_winner_gain,
        }
    }

    /// Evaluate one open, profitable position. Returns at most one
    /// recommendation; unprofitable positions are not this module's
    /// business.
    pub fn analyze(
        &self,
        position: &Position,
        quote: &PriceQuote,
        now: DateTime<Utc>,
    ) -> Option<AmplifierRecommendation> {
        let p = self.profile(position, quote, now);
        if p.gain <= Decimal::ZERO {
            return None;
        }

        // Fade-out checks first; giving back a run beats pressing it.
        if p.drawdown_from_peak > self.config.exit_drawdown_from_peak
            && p.peak_gain > self.config.exit_min_peak_gain
        {
            return Some(AmplifierRecommendation {
                asset_id: position.asset_id.clone(),
                kind: RecommendationKind::EarlyExit,
                rationale: format!(
                    "gave back {:.1}% from a peak gain of {:.1}%",
                    p.drawdown_from_peak * Decimal::ONE_HUNDRED,
                    p.peak_gain * Decimal::ONE_HUNDRED
                ),
            });
        }
        if let Some(momentum) = p.momentum {
            if momentum < self.config.exit_max_momentum && p.gain > self.config.exit_min_gain {
                return Some(AmplifierRecommendation {
                    asset_id: position.asset_id.clone(),
                    kind: RecommendationKind::EarlyExit,
                    rationale: format!(
                        "momentum faded to {:.2} while up {:.1}%",
                        momentum,
                        p.gain * Decimal::ONE_HUNDRED
                    ),
                });
            }
        }
        if p.super_winner
            && p.held > chrono::Duration::days(self.config.super_winner_max_age_days)
        {
            return Some(AmplifierRecommendation {
                asset_id: position.asset_id.clone(),
                kind: RecommendationKind::EarlyExit,
                rationale: format!(
                    "super winner aged {} days",
                    p.held.num_days()
                ),
            });
        }

        // Scale-up needs every condition at once. A position that has
        // already run past the super-winner mark is never chased.
        let momentum_ok = p
            .momentum
            .map(|m| m > self.config.scale_up_min_momentum)
            .unwrap_or(false);
        if p.gain > self.config.scale_up_min_gain
            && momentum_ok
            && p.drawdown_from_peak < self.config.scale_up_max_drawdown
            && p.held < chrono::Duration::days(self.config.scale_up_max_age_days)
            && !p.super_winner
        {
            let additional_size = position.committed_size * self.config.scale_up_fraction;
            return Some(AmplifierRecommendation {
                asset_id: position.asset_id.clone(),
                kind: RecommendationKind::ScaleUp { additional_size },
                rationale: format!(
                    "up {:.1}% with momentum {:.2} and {:.1}% off peak",
                    p.gain * Decimal::ONE_HUNDRED,
                    p.momentum.unwrap_or(0.0),
                    p.drawdown_from_peak * Decimal::ONE_HUNDRED
                ),
            });
        }

        None
    }

    /// Fold a closed trade into the rolling winner window and, for big
    /// winners, the learned signal frequencies. `final_quote` is the quote
    /// the closing action was taken against, when one was available.
    pub fn observe(&mut self, outcome: &TradeOutcome, final_quote: Option<&PriceQuote>) {
        if !outcome.is_win() {
            return;
        }

        self.closed_winners.push_back(outcome.clone());
        while self.closed_winners.len() > self.config.winner_window {
            self.closed_winners.pop_front();
        }

        if outcome.return_pct() >= self.config.big_winner_gain {
            self.big_winner_count += 1;
            for signal in winner_signals(outcome, final_quote) {
                *self.pattern_hits.entry(signal).or_insert(0) += 1;
            }
            debug!(
                asset = %outcome.asset_id,
                return_pct = %outcome.return_pct(),
                big_winners = self.big_winner_count,
                "Recorded big winner"
            );
        }
    }

    /// Does this candidate's quote match the learned big-winner profile?
    pub fn match_candidate(
        &self,
        asset_id: &str,
        quote: &PriceQuote,
    ) -> Option<AmplifierRecommendation> {
        if self.big_winner_count < MIN_BIG_WINNERS {
            return None;
        }

        let matched: Vec<&str> = quote_signals(quote)
            .into_iter()
            .filter(|signal| {
                let hits = self.pattern_hits.get(signal).copied().unwrap_or(0);
                hits as f64 / self.big_winner_count as f64 >= self.config.pattern_min_frequency
            })
            .collect();

        if matched.len() >= self.config.pattern_min_signals {
            Some(AmplifierRecommendation {
                asset_id: asset_id.to_string(),
                kind: RecommendationKind::NewEntry,
                rationale: format!("matches winner profile on {}", matched.join(", ")),
            })
        } else {
            None
        }
    }

    /// Signal frequencies among observed big winners.
    pub fn patterns(&self) -> Vec<HistoricalPattern> {
        let mut patterns: Vec<_> = self
            .pattern_hits
            .iter()
            .map(|(signal, hits)| HistoricalPattern {
                signal: (*signal).to_string(),
                frequency: *hits as f64 / self.big_winner_count.max(1) as f64,
            })
            .collect();
        patterns.sort_by(|a, b| b.frequency.total_cmp(&a.frequency));
        patterns
    }

    /// Aggregate statistics over the rolling winner window.
    pub fn stats(&self) -> WinnerStats {
        let returns: Vec<f64> = self
            .closed_winners
            .iter()
            .filter_map(|o| o.return_pct().to_f64())
            .collect();

        let mean_return = if returns.is_empty() {
            0.0
        } else {
            returns.clone().mean()
        };
        let return_std = if returns.len() < 2 {
            0.0
        } else {
            returns.std_dev()
        };

        WinnerStats {
            winners: self.closed_winners.len(),
            big_winners: self.big_winner_count,
            mean_return,
            return_std,
        }
    }
}

/// Momentum score in [0, 1]: weighted average of whichever signals the
/// quote carries. Missing signals are left out of the average, not
/// treated as zero. No signals at all means no score.
pub fn momentum_score(quote: &PriceQuote) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;

    if let Some(r) = quote.short_return {
        weighted += 0.4 * clamp01(0.5 + r / 0.2);
        weight_sum += 0.4;
    }
    if let Some(r) = quote.medium_return {
        weighted += 0.3 * clamp01(0.5 + r / 0.5);
        weight_sum += 0.3;
    }
    if let Some(v) = quote.volume_ratio {
        weighted += 0.3 * clamp01(v / 2.0);
        weight_sum += 0.3;
    }

    if weight_sum == 0.0 {
        None
    } else {
        Some(weighted / weight_sum)
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Signals readable off a quote alone.
fn quote_signals(quote: &PriceQuote) -> Vec<&'static str> {
    let mut signals = Vec::new();
    if quote.short_return.map(|r| r > 0.05).unwrap_or(false) {
        signals.push(SIG_SHORT_MOMENTUM);
    }
    if quote.medium_return.map(|r| r > 0.2).unwrap_or(false) {
        signals.push(SIG_SUSTAINED_MOMENTUM);
    }
    if quote.volume_ratio.map(|v| v > 1.5).unwrap_or(false) {
        signals.push(SIG_ELEVATED_VOLUME);
    }
    signals
}

/// Signals for a just-closed big winner: quote signals plus how fast the
/// run happened.
fn winner_signals(outcome: &TradeOutcome, final_quote: Option<&PriceQuote>) -> Vec<&'static str> {
    let mut signals = final_quote.map(quote_signals).unwrap_or_default();
    if outcome.held_for() < chrono::Duration::hours(24) {
        signals.push(SIG_FAST_RUNNER);
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;
    use rust_decimal_macros::dec;

    fn quote(price: Decimal) -> PriceQuote {
        PriceQuote {
            asset_id: "MINT1".to_string(),
            price,
            as_of: Utc::now(),
            short_return: Some(0.08),
            medium_return: Some(0.3),
            volume_ratio: Some(1.8),
        }
    }

    fn winner_position(entry: Decimal, hours_ago: i64) -> Position {
        Position::open(
            "MINT1".to_string(),
            entry,
            dec!(100),
            Utc::now() - chrono::Duration::hours(hours_ago),
        )
    }

    fn amplifier() -> WinnerAmplifier {
        WinnerAmplifier::new(AmplifierConfig::default())
    }

    fn big_winner(return_pct: Decimal, held_hours: i64) -> TradeOutcome {
        let entered = Utc::now() - chrono::Duration::hours(held_hours);
        TradeOutcome {
            id: "test".to_string(),
            asset_id: "MINT1".to_string(),
            entered_at: entered,
            closed_at: Utc::now(),
            entry_price: dec!(1.0),
            exit_price: dec!(1.0) + return_pct,
            committed_size: dec!(100),
            realized_pnl: return_pct * dec!(100),
            reason: ExitReason::TrailingStop,
            balance_after: dec!(1000),
        }
    }

    #[test]
    fn test_momentum_uses_all_signals() {
        let q = quote(dec!(1.0));
        let m = momentum_score(&q).unwrap();
        // short 0.9, medium 1.0, volume 0.9 under the 0.4/0.3/0.3 weights
        assert!((m - 0.93).abs() < 0.01);
    }

    #[test]
    fn test_momentum_omits_missing_signals() {
        let q = PriceQuote {
            short_return: None,
            volume_ratio: None,
            ..quote(dec!(1.0))
        };
        // Only the medium-return signal contributes; it is not diluted.
        assert_eq!(momentum_score(&q), Some(1.0));

        let empty = PriceQuote {
            short_return: None,
            medium_return: None,
            volume_ratio: None,
            ..quote(dec!(1.0))
        };
        assert_eq!(momentum_score(&empty), None);
    }

    #[test]
    fn test_scale_up_when_all_conditions_hold() {
        let amp = amplifier();
        let mut pos = winner_position(dec!(1.0), 48);
        pos.observe_price(dec!(1.5));

        let rec = amp.analyze(&pos, &quote(dec!(1.5)), Utc::now()).unwrap();
        assert_eq!(
            rec.kind,
            RecommendationKind::ScaleUp {
                additional_size: dec!(50)
            }
        );
    }

    #[test]
    fn test_super_winner_is_not_scaled() {
        let amp = amplifier();
        let mut pos = winner_position(dec!(1.0), 48);
        pos.observe_price(dec!(2.5));

        // +150% gain: excluded from scale-up despite perfect momentum.
        let rec = amp.analyze(&pos, &quote(dec!(2.5)), Utc::now());
        assert!(rec.is_none());
    }

    #[test]
    fn test_old_position_is_not_scaled() {
        let amp = amplifier();
        let mut pos = winner_position(dec!(1.0), 8 * 24);
        pos.observe_price(dec!(1.5));

        assert!(amp.analyze(&pos, &quote(dec!(1.5)), Utc::now()).is_none());
    }

    #[test]
    fn test_exit_on_drawdown_from_peak() {
        let amp = amplifier();
        let mut pos = winner_position(dec!(1.0), 48);
        pos.observe_price(dec!(1.8)); // peak gain 80%

        // Price back to 1.3: 27.8% off peak while peak gain exceeded 50%.
        let rec = amp.analyze(&pos, &quote(dec!(1.3)), Utc::now()).unwrap();
        assert_eq!(rec.kind, RecommendationKind::EarlyExit);
    }

    #[test]
    fn test_exit_on_faded_momentum() {
        let amp = amplifier();
        let mut pos = winner_position(dec!(1.0), 48);
        pos.observe_price(dec!(1.6));

        let faded = PriceQuote {
            short_return: Some(-0.08),
            medium_return: Some(-0.2),
            volume_ratio: Some(0.3),
            ..quote(dec!(1.6))
        };
        let rec = amp.analyze(&pos, &faded, Utc::now()).unwrap();
        assert_eq!(rec.kind, RecommendationKind::EarlyExit);
    }

    #[test]
    fn test_exit_on_aged_super_winner() {
        let amp = amplifier();
        let mut pos = winner_position(dec!(1.0), 15 * 24);
        pos.observe_price(dec!(2.2));

        let rec = amp.analyze(&pos, &quote(dec!(2.2)), Utc::now()).unwrap();
        assert_eq!(rec.kind, RecommendationKind::EarlyExit);
    }

    #[test]
    fn test_losing_position_is_ignored() {
        let amp = amplifier();
        let pos = winner_position(dec!(1.0), 48);

        assert!(amp.analyze(&pos, &quote(dec!(0.9)), Utc::now()).is_none());
    }

    #[test]
    fn test_profile_match_after_enough_big_winners() {
        let mut amp = amplifier();
        let q = quote(dec!(2.0));

        for _ in 0..3 {
            amp.observe(&big_winner(dec!(0.8), 12), Some(&q));
        }

        let rec = amp.match_candidate("MINT2", &quote(dec!(1.0))).unwrap();
        assert_eq!(rec.kind, RecommendationKind::NewEntry);

        // A flat candidate does not match.
        let flat = PriceQuote {
            short_return: Some(0.0),
            medium_return: Some(0.0),
            volume_ratio: Some(0.5),
            ..quote(dec!(1.0))
        };
        assert!(amp.match_candidate("MINT3", &flat).is_none());
    }

    #[test]
    fn test_no_profile_match_before_enough_observations() {
        let mut amp = amplifier();
        amp.observe(&big_winner(dec!(0.8), 12), Some(&quote(dec!(2.0))));

        assert!(amp.match_candidate("MINT2", &quote(dec!(1.0))).is_none());
    }

    #[test]
    fn test_losses_never_enter_the_window() {
        let mut amp = amplifier();
        let mut loss = big_winner(dec!(0.5), 12);
        loss.realized_pnl = dec!(-10);
        amp.observe(&loss, None);

        assert_eq!(amp.stats().winners, 0);
    }

    #[test]
    fn test_winner_window_is_bounded() {
        let config = AmplifierConfig {
            winner_window: 5,
            ..Default::default()
        };
        let mut amp = WinnerAmplifier::new(config);

        for _ in 0..12 {
            amp.observe(&big_winner(dec!(0.1), 12), None);
        }
        assert_eq!(amp.stats().winners, 5);
    }
}
