//! Market-data collaborator contracts: price feed and confidence model.
//!
//! The decision core consumes these through traits; live HTTP and
//! simulated implementations live in the submodules. A feed must never
//! hand back a zero or stale price as data; those are errors, and the
//! control loop skips the affected asset for the cycle.

mod http;
mod sim;

pub use http::HttpPriceFeed;
pub use sim::{SimConfidence, SimFeed, SimTick};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated market quote for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset_id: String,

    /// Spot price, strictly positive.
    pub price: Decimal,

    /// Quote timestamp from the venue; monotonic per asset.
    pub as_of: DateTime<Utc>,

    /// Short-window (roughly an hour) return, when the venue reports one.
    pub short_return: Option<f64>,

    /// Medium-window (roughly a day) return.
    pub medium_return: Option<f64>,

    /// Current volume relative to the trailing average.
    pub volume_ratio: Option<f64>,
}

/// Price-feed failures. Recovered locally: the affected asset is skipped
/// for one cycle, nothing is closed or resized on bad data.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("no quote available for {asset_id}")]
    NotFound { asset_id: String },

    #[error("quote for {asset_id} has zero or negative price")]
    ZeroPrice { asset_id: String },

    #[error("quote for {asset_id} is stale: {age_secs}s old")]
    Stale { asset_id: String, age_secs: i64 },

    #[error("quote fetch for {asset_id} missed the cycle deadline")]
    Timeout { asset_id: String },

    #[error("transport error fetching {asset_id}: {message}")]
    Transport { asset_id: String, message: String },
}

/// Source of market quotes.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn quote(&self, asset_id: &str) -> Result<PriceQuote, FeedError>;
}

/// External predictive model scoring candidate entries in [0, 1].
/// `None` means the model has no opinion and the default sizing fraction
/// applies.
#[async_trait]
pub trait ConfidenceModel: Send + Sync {
    async fn score(&self, asset_id: &str) -> Option<f64>;
}

/// Confidence model that never has an opinion.
pub struct NullConfidence;

#[async_trait]
impl ConfidenceModel for NullConfidence {
    async fn score(&self, _asset_id: &str) -> Option<f64> {
        None
    }
}
