//! HTTP market-data client.
//!
//! Transient transport failures are retried with exponential backoff; a
//! response that decodes but fails validation (zero price, stale
//! timestamp) is a feed error and is never retried into the cycle.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::{FeedError, PriceFeed, PriceQuote};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Quotes older than this are stale, not data.
const MAX_QUOTE_AGE_SECS: i64 = 120;

/// Wire format of the quote endpoint.
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: Decimal,
    /// Unix seconds from the venue clock.
    timestamp: i64,
    short_return: Option<f64>,
    medium_return: Option<f64>,
    volume_ratio: Option<f64>,
}

/// Client for a market-data quote API (read-only).
pub struct HttpPriceFeed {
    client: Client,
    base_url: String,
}

impl HttpPriceFeed {
    /// Create a new feed client with default settings.
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    async fn fetch(&self, asset_id: &str) -> Result<QuoteResponse, FeedError> {
        let url = format!("{}/quote?asset={}", self.base_url, asset_id);
        debug!(url = %url, "Fetching quote");

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(8)),
            ..Default::default()
        };

        backoff::future::retry(policy, || async {
            let response = self.client.get(&url).send().await.map_err(|e| {
                backoff::Error::transient(FeedError::Transport {
                    asset_id: asset_id.to_string(),
                    message: e.to_string(),
                })
            })?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(backoff::Error::permanent(FeedError::NotFound {
                    asset_id: asset_id.to_string(),
                }));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(FeedError::Transport {
                    asset_id: asset_id.to_string(),
                    message: format!("server error {status}"),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(FeedError::Transport {
                    asset_id: asset_id.to_string(),
                    message: format!("request failed with {status}"),
                }));
            }

            response.json::<QuoteResponse>().await.map_err(|e| {
                backoff::Error::permanent(FeedError::Transport {
                    asset_id: asset_id.to_string(),
                    message: format!("malformed quote body: {e}"),
                })
            })
        })
        .await
    }
}

/// Boundary validation: a decoded response becomes a quote only if the
/// price is positive and the timestamp is fresh.
fn validate(asset_id: &str, raw: QuoteResponse) -> Result<PriceQuote, FeedError> {
    if raw.price <= Decimal::ZERO {
        return Err(FeedError::ZeroPrice {
            asset_id: asset_id.to_string(),
        });
    }

    let as_of = Utc
        .timestamp_opt(raw.timestamp, 0)
        .single()
        .ok_or_else(|| FeedError::Transport {
            asset_id: asset_id.to_string(),
            message: format!("unrepresentable timestamp {}", raw.timestamp),
        })?;

    let age_secs = (Utc::now() - as_of).num_seconds();
    if age_secs > MAX_QUOTE_AGE_SECS {
        return Err(FeedError::Stale {
            asset_id: asset_id.to_string(),
            age_secs,
        });
    }

    Ok(PriceQuote {
        asset_id: asset_id.to_string(),
        price: raw.price,
        as_of,
        short_return: raw.short_return,
        medium_return: raw.medium_return,
        volume_ratio: raw.volume_ratio,
    })
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn quote(&self, asset_id: &str) -> Result<PriceQuote, FeedError> {
        let raw = self.fetch(asset_id).await?;
        validate(asset_id, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(price: Decimal, timestamp: i64) -> QuoteResponse {
        QuoteResponse {
            price,
            timestamp,
            short_return: Some(0.02),
            medium_return: None,
            volume_ratio: Some(1.1),
        }
    }

    #[test]
    fn test_fresh_quote_passes_validation() {
        let quote = validate("MINT1", raw(dec!(1.25), Utc::now().timestamp())).unwrap();
        assert_eq!(quote.price, dec!(1.25));
        assert_eq!(quote.short_return, Some(0.02));
        assert_eq!(quote.medium_return, None);
    }

    #[test]
    fn test_zero_price_is_an_error_not_data() {
        let err = validate("MINT1", raw(dec!(0), Utc::now().timestamp())).unwrap_err();
        assert!(matches!(err, FeedError::ZeroPrice { .. }));
    }

    #[test]
    fn test_stale_quote_rejected() {
        let old = Utc::now().timestamp() - 600;
        let err = validate("MINT1", raw(dec!(1.0), old)).unwrap_err();
        assert!(matches!(err, FeedError::Stale { .. }));
    }
}
