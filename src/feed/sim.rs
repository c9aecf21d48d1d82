//! Simulated feed and confidence model for paper trading and tests.
//!
//! Each asset follows a scripted tick series; every `quote` call advances
//! that asset's cursor by one and the final tick repeats forever. Scripts
//! may include zero-price ticks to exercise the feed-failure path.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::{ConfidenceModel, FeedError, PriceFeed, PriceQuote};

/// One scripted market observation.
#[derive(Debug, Clone)]
pub struct SimTick {
    pub price: Decimal,
    pub short_return: Option<f64>,
    pub medium_return: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl SimTick {
    pub fn price(price: Decimal) -> Self {
        Self {
            price,
            short_return: None,
            medium_return: None,
            volume_ratio: None,
        }
    }

    pub fn with_signals(
        price: Decimal,
        short_return: f64,
        medium_return: f64,
        volume_ratio: f64,
    ) -> Self {
        Self {
            price,
            short_return: Some(short_return),
            medium_return: Some(medium_return),
            volume_ratio: Some(volume_ratio),
        }
    }
}

/// Deterministic scripted price feed.
pub struct SimFeed {
    series: HashMap<String, Vec<SimTick>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl SimFeed {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_series(mut self, asset_id: &str, ticks: Vec<SimTick>) -> Self {
        self.series.insert(asset_id.to_string(), ticks);
        self
    }

    /// A small demo universe: one steady climber, one pump-and-fade, one
    /// asset whose feed goes bad mid-run.
    pub fn demo() -> Self {
        use rust_decimal_macros::dec;

        Self::new()
            .with_series(
                "CLIMBER",
                vec![
                    SimTick::with_signals(dec!(1.00), 0.02, 0.05, 1.2),
                    SimTick::with_signals(dec!(1.12), 0.06, 0.10, 1.4),
                    SimTick::with_signals(dec!(1.27), 0.07, 0.18, 1.6),
                    SimTick::with_signals(dec!(1.45), 0.08, 0.30, 1.9),
                    SimTick::with_signals(dec!(1.60), 0.06, 0.35, 1.7),
                    SimTick::with_signals(dec!(1.52), -0.03, 0.28, 1.1),
                    SimTick::with_signals(dec!(1.38), -0.06, 0.15, 0.8),
                ],
            )
            .with_series(
                "SPIKER",
                vec![
                    SimTick::with_signals(dec!(0.50), 0.09, 0.20, 2.5),
                    SimTick::with_signals(dec!(0.85), 0.12, 0.45, 3.0),
                    SimTick::with_signals(dec!(0.70), -0.08, 0.30, 1.5),
                    SimTick::with_signals(dec!(0.52), -0.12, 0.05, 0.9),
                    SimTick::with_signals(dec!(0.45), -0.05, -0.10, 0.6),
                ],
            )
            .with_series(
                "GLITCHY",
                vec![
                    SimTick::price(dec!(2.00)),
                    SimTick::price(dec!(2.10)),
                    SimTick::price(dec!(0)), // feed failure, skipped for the cycle
                    SimTick::price(dec!(2.05)),
                ],
            )
    }
}

impl Default for SimFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceFeed for SimFeed {
    async fn quote(&self, asset_id: &str) -> Result<PriceQuote, FeedError> {
        let ticks = self.series.get(asset_id).ok_or_else(|| FeedError::NotFound {
            asset_id: asset_id.to_string(),
        })?;
        if ticks.is_empty() {
            return Err(FeedError::NotFound {
                asset_id: asset_id.to_string(),
            });
        }

        let index = {
            let mut cursors = self
                .cursors
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let cursor = cursors.entry(asset_id.to_string()).or_insert(0);
            let index = (*cursor).min(ticks.len() - 1);
            *cursor += 1;
            index
        };

        let tick = &ticks[index];
        if tick.price <= Decimal::ZERO {
            return Err(FeedError::ZeroPrice {
                asset_id: asset_id.to_string(),
            });
        }

        Ok(PriceQuote {
            asset_id: asset_id.to_string(),
            price: tick.price,
            as_of: Utc::now(),
            short_return: tick.short_return,
            medium_return: tick.medium_return,
            volume_ratio: tick.volume_ratio,
        })
    }
}

/// Scripted confidence model: fixed score per asset, no opinion otherwise.
pub struct SimConfidence {
    scores: HashMap<String, f64>,
}

impl SimConfidence {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
        }
    }

    pub fn with_score(mut self, asset_id: &str, score: f64) -> Self {
        self.scores.insert(asset_id.to_string(), score);
        self
    }
}

impl Default for SimConfidence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfidenceModel for SimConfidence {
    async fn score(&self, asset_id: &str) -> Option<f64> {
        self.scores.get(asset_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_series_advances_and_holds_last_tick() {
        let feed = SimFeed::new().with_series(
            "A",
            vec![SimTick::price(dec!(1.0)), SimTick::price(dec!(2.0))],
        );

        assert_eq!(feed.quote("A").await.unwrap().price, dec!(1.0));
        assert_eq!(feed.quote("A").await.unwrap().price, dec!(2.0));
        assert_eq!(feed.quote("A").await.unwrap().price, dec!(2.0));
    }

    #[tokio::test]
    async fn test_unknown_asset_is_not_found() {
        let feed = SimFeed::new();
        assert!(matches!(
            feed.quote("MISSING").await,
            Err(FeedError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_price_tick_is_an_error() {
        let feed = SimFeed::new().with_series("A", vec![SimTick::price(dec!(0))]);
        assert!(matches!(
            feed.quote("A").await,
            Err(FeedError::ZeroPrice { .. })
        ));
    }
}
