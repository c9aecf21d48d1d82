//! Trading decision core: sizing, exit rules, risk governance, winner
//! amplification.

mod amplifier;
mod config;
mod exits;
mod risk;
mod sizer;

pub use amplifier::{
    AmplifierRecommendation, HistoricalPattern, RecommendationKind, WinnerAmplifier,
    WinnerProfile, WinnerStats,
};
pub use config::{AmplifierConfig, ConfigError, ExitPolicy, RiskLimits, SizingBounds, Tranche};
pub use exits::{ExitAction, ExitEngine};
pub use risk::{RiskBlock, RiskGovernor, RiskState};
pub use sizer::{PositionSizer, SizeError, SizingDecision};
