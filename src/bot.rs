//! Control loop: one polling cycle at a time over the owned position table.
//!
//! Each cycle fetches a consistent price snapshot (concurrent fan-out with
//! a deadline), evaluates exits for every open position, runs winner
//! amplification, and sizes new candidates behind the risk gate. The
//! position table and risk state are owned here exclusively; the sizer,
//! exit engine, governor, and amplifier are invoked synchronously within
//! the cycle and hold nothing across cycles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::feed::{ConfidenceModel, FeedError, PriceFeed, PriceQuote};
use crate::ledger::Ledger;
use crate::models::{ExitReason, Position, TradeOutcome};
use crate::trading::{
    AmplifierConfig, ConfigError, ExitEngine, ExitPolicy, PositionSizer, RecommendationKind,
    RiskGovernor, RiskLimits, RiskState, SizeError, SizingBounds, SizingDecision, WinnerAmplifier,
};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Starting cash balance in base-currency units.
    pub starting_balance: Decimal,

    /// Polling interval between cycles (seconds).
    pub poll_interval_secs: u64,

    /// Deadline for the cycle's price fan-out; quotes not back in time are
    /// unavailable for this cycle.
    pub cycle_deadline_ms: u64,

    /// Candidate assets considered for new entries.
    pub watchlist: Vec<String>,

    pub sizing: SizingBounds,
    pub exits: ExitPolicy,
    pub limits: RiskLimits,
    pub amplifier: AmplifierConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            starting_balance: dec!(1000),
            poll_interval_secs: 30,
            cycle_deadline_ms: 5000,
            watchlist: Vec::new(),
            sizing: SizingBounds::default(),
            exits: ExitPolicy::default(),
            limits: RiskLimits::default(),
            amplifier: AmplifierConfig::default(),
        }
    }
}

/// The trading control loop.
pub struct Bot<F, C, L> {
    config: BotConfig,
    feed: F,
    confidence: C,
    ledger: L,

    sizer: PositionSizer,
    exit_engine: ExitEngine,
    governor: RiskGovernor,
    amplifier: WinnerAmplifier,

    /// Open positions, keyed by asset id. At most one per asset.
    positions: HashMap<String, Position>,
    risk: RiskState,
    cash: Decimal,

    shutdown: Arc<AtomicBool>,
}

impl<F, C, L> Bot<F, C, L>
where
    F: PriceFeed,
    C: ConfidenceModel,
    L: Ledger,
{
    /// Build a bot, validating every config section up front.
    pub fn new(config: BotConfig, feed: F, confidence: C, ledger: L) -> Result<Self, ConfigError> {
        let sizer = PositionSizer::new(config.sizing.clone().validated()?);
        let exit_engine = ExitEngine::new(config.exits.clone().validated()?);
        let governor = RiskGovernor::new(config.limits.clone().validated()?);
        let amplifier = WinnerAmplifier::new(config.amplifier.clone());

        let risk = RiskState::new(config.starting_balance);
        let cash = config.starting_balance;

        Ok(Self {
            config,
            feed,
            confidence,
            ledger,
            sizer,
            exit_engine,
            governor,
            amplifier,
            positions: HashMap::new(),
            risk,
            cash,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn amplifier(&self) -> &WinnerAmplifier {
        &self.amplifier
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            poll_interval = self.config.poll_interval_secs,
            watchlist = self.config.watchlist.len(),
            balance = %self.config.starting_balance,
            "Starting control loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in control cycle");
            }
        }

        info!("Control loop stopped");
        Ok(())
    }

    /// One complete cycle. Runs to completion before the next begins.
    pub async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        debug!("Control cycle");

        // 1. Daily risk boundary
        self.governor.maybe_reset_daily(&mut self.risk, now);

        // 2. One consistent quote snapshot for every decision this cycle
        let quotes = self.fetch_snapshot().await;

        // 3. Exits for all open positions; these always run, whatever the
        //    gate says about new entries.
        self.process_exits(&quotes, now).await?;

        // 4. Winner amplification on what stayed open
        self.process_amplifier(&quotes, now);

        // 5. New entries behind the risk gate
        match self.governor.gate(&self.risk) {
            Ok(()) => self.process_candidates(&quotes, now).await?,
            Err(block) => warn!(reason = %block, "New entries blocked"),
        }

        // 6. Equity point
        let equity = self.equity(&quotes);
        self.governor.observe_balance(&mut self.risk, equity);
        self.ledger.record_equity(equity, self.positions.len()).await?;

        Ok(())
    }

    /// Fetch quotes for all open positions and watchlist candidates
    /// concurrently. An asset whose fetch misses the deadline is simply
    /// unavailable for this cycle; it never blocks the rest.
    async fn fetch_snapshot(&self) -> HashMap<String, Result<PriceQuote, FeedError>> {
        let mut assets: Vec<String> = self.positions.keys().cloned().collect();
        for candidate in &self.config.watchlist {
            if !self.positions.contains_key(candidate) {
                assets.push(candidate.clone());
            }
        }

        let deadline = Duration::from_millis(self.config.cycle_deadline_ms);
        let fetches = assets.iter().map(|asset_id| async move {
            let result = match timeout(deadline, self.feed.quote(asset_id)).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout {
                    asset_id: asset_id.clone(),
                }),
            };
            (asset_id.clone(), result)
        });

        join_all(fetches).await.into_iter().collect()
    }

    /// Evaluate exit rules for every open position against the snapshot.
    async fn process_exits(
        &mut self,
        quotes: &HashMap<String, Result<PriceQuote, FeedError>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let open_assets: Vec<String> = self.positions.keys().cloned().collect();
        let mut pending_close: Vec<(Position, ExitReason, PriceQuote)> = Vec::new();

        for asset_id in open_assets {
            let quote = match quotes.get(&asset_id) {
                Some(Ok(quote)) => quote.clone(),
                Some(Err(e)) => {
                    warn!(
                        asset = %asset_id,
                        error = %e,
                        "Price unavailable, skipping position this cycle"
                    );
                    continue;
                }
                None => continue,
            };

            let actions = match self.positions.get_mut(&asset_id) {
                Some(position) => self.exit_engine.evaluate(position, quote.price, now),
                None => continue,
            };

            for action in &actions {
                self.cash += action.proceeds;
                info!(
                    asset = %action.asset_id,
                    reason = ?action.reason,
                    fraction = %action.fraction,
                    pnl = %action.realized_pnl,
                    "Exit applied"
                );
            }

            let closed = self
                .positions
                .get(&asset_id)
                .map(|p| !p.is_open())
                .unwrap_or(false);
            if closed {
                if let (Some(position), Some(last)) =
                    (self.positions.remove(&asset_id), actions.last())
                {
                    pending_close.push((position, last.reason, quote));
                }
            }
        }

        if pending_close.is_empty() {
            return Ok(());
        }

        // Settle all closes against the post-exit equity, then feed the
        // outcomes back.
        self.risk.open_position_count = self.positions.len();
        let equity = self.equity(quotes);
        self.governor.observe_balance(&mut self.risk, equity);

        for (position, reason, quote) in pending_close {
            let outcome = TradeOutcome {
                id: uuid::Uuid::new_v4().to_string(),
                asset_id: position.asset_id.clone(),
                entered_at: position.entry_time,
                closed_at: now,
                entry_price: position.entry_price,
                exit_price: quote.price,
                committed_size: position.committed_size,
                realized_pnl: position.realized_pnl,
                reason,
                balance_after: equity,
            };

            info!(
                asset = %outcome.asset_id,
                pnl = %outcome.realized_pnl,
                reason = ?outcome.reason,
                "Position closed"
            );

            self.ledger.append(&outcome).await?;
            self.governor.record(&mut self.risk, &outcome);
            self.amplifier.observe(&outcome, Some(&quote));
        }

        Ok(())
    }

    /// Collect amplifier advisories and execute scale-ups as synthetic
    /// additional entries. Early-exit advisories are surfaced only; the
    /// exit engine stays the sole authority on exits.
    fn process_amplifier(
        &mut self,
        quotes: &HashMap<String, Result<PriceQuote, FeedError>>,
        now: DateTime<Utc>,
    ) {
        let gate_open = self.governor.gate(&self.risk).is_ok();
        let mut scale_ups: Vec<(String, Decimal, Decimal)> = Vec::new();

        for (asset_id, position) in &self.positions {
            let Some(Ok(quote)) = quotes.get(asset_id) else {
                continue;
            };

            if let Some(rec) = self.amplifier.analyze(position, quote, now) {
                match rec.kind {
                    RecommendationKind::ScaleUp { additional_size } => {
                        info!(
                            asset = %rec.asset_id,
                            additional = %additional_size,
                            rationale = %rec.rationale,
                            "Amplifier recommends scale-up"
                        );
                        scale_ups.push((asset_id.clone(), additional_size, quote.price));
                    }
                    RecommendationKind::EarlyExit => {
                        info!(
                            asset = %rec.asset_id,
                            rationale = %rec.rationale,
                            "Amplifier recommends early exit"
                        );
                    }
                    RecommendationKind::NewEntry => {}
                }
            }
        }

        for (asset_id, additional_size, price) in scale_ups {
            if !gate_open {
                debug!(asset = %asset_id, "Scale-up suppressed while entries are blocked");
                continue;
            }

            let add = additional_size.min(self.cash);
            if add <= Decimal::ZERO {
                continue;
            }

            if let Some(position) = self.positions.get_mut(&asset_id) {
                position.scale_up(add, price);
                self.cash -= add;
                info!(
                    asset = %asset_id,
                    added = %add,
                    committed = %position.committed_size,
                    "Scaled up position"
                );
            }
        }
    }

    /// Size and open new positions for watchlist candidates.
    async fn process_candidates(
        &mut self,
        quotes: &HashMap<String, Result<PriceQuote, FeedError>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for asset_id in self.config.watchlist.clone() {
            // One open position per asset, ever.
            if self.positions.contains_key(&asset_id) {
                continue;
            }
            // Re-check as the table grows within the cycle.
            if self.governor.gate(&self.risk).is_err() {
                break;
            }

            let quote = match quotes.get(&asset_id) {
                Some(Ok(quote)) => quote.clone(),
                Some(Err(e)) => {
                    debug!(asset = %asset_id, error = %e, "No usable quote for candidate");
                    continue;
                }
                None => continue,
            };

            if let Some(rec) = self.amplifier.match_candidate(&asset_id, &quote) {
                info!(
                    asset = %rec.asset_id,
                    rationale = %rec.rationale,
                    "Candidate matches winner profile"
                );
            }

            let confidence = self.confidence.score(&asset_id).await;
            let size = match self.sizer.size(self.cash, confidence, &self.risk) {
                Ok(size) => size,
                Err(SizeError::InsufficientBalance { balance }) => {
                    debug!(asset = %asset_id, balance = %balance, "No balance left for entry");
                    continue;
                }
                Err(e) => {
                    warn!(asset = %asset_id, error = %e, "Sizing rejected");
                    continue;
                }
            };
            if size <= Decimal::ZERO {
                continue;
            }

            let decision = SizingDecision {
                asset_id: asset_id.clone(),
                size,
            };
            info!(
                asset = %decision.asset_id,
                size = %decision.size,
                price = %quote.price,
                confidence = ?confidence,
                "Opening position"
            );

            self.cash -= decision.size;
            self.positions.insert(
                asset_id.clone(),
                Position::open(asset_id, quote.price, decision.size, now),
            );
            self.risk.open_position_count = self.positions.len();
        }

        Ok(())
    }

    /// Cash plus the value of open positions at this cycle's quotes.
    /// Positions without a usable quote are carried at cost basis.
    fn equity(&self, quotes: &HashMap<String, Result<PriceQuote, FeedError>>) -> Decimal {
        let mut equity = self.cash;
        for (asset_id, position) in &self.positions {
            match quotes.get(asset_id) {
                Some(Ok(quote)) => equity += position.remaining_value_at(quote.price),
                _ => equity += position.remaining_fraction * position.committed_size,
            }
        }
        equity
    }
}
