use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Lowest confidence floor a live session may run with.
pub const MIN_LIVE_CONFIDENCE: u8 = 60;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LimitsError {
    #[error("allowed_symbols must not be empty")]
    NoSymbols,
    #[error("min_confidence {0} must be between 60 and 100")]
    ConfidenceOutOfRange(u8),
    #[error("risk_per_trade_percent {0} must be in (0, 100]")]
    RiskPerTrade(f64),
    #[error("max_daily_loss_percent {0} must be positive")]
    DailyLoss(f64),
    #[error("max_position_value {0} must be positive")]
    PositionValue(f64),
}

/// Risk limits a control-loop run is started with. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Signals below this confidence are never traded
    pub min_confidence: u8,
    /// Open positions allowed per account
    pub max_positions: u32,
    /// Share of available balance put at risk per trade, in percent
    pub risk_per_trade_percent: f64,
    pub allowed_symbols: BTreeSet<String>,
    /// Realized daily loss over available balance that stops new trades, in percent
    pub max_daily_loss_percent: f64,
    /// Cap on quantity x price of a single order
    pub max_position_value: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            min_confidence: 80,
            max_positions: 5,
            risk_per_trade_percent: 2.0,
            allowed_symbols: ["BTCUSDT", "ETHUSDT", "BNBUSDT"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_daily_loss_percent: 5.0,
            max_position_value: 5000.0,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.allowed_symbols.is_empty() {
            return Err(LimitsError::NoSymbols);
        }
        if self.min_confidence < MIN_LIVE_CONFIDENCE || self.min_confidence > 100 {
            return Err(LimitsError::ConfidenceOutOfRange(self.min_confidence));
        }
        if !(self.risk_per_trade_percent > 0.0 && self.risk_per_trade_percent <= 100.0) {
            return Err(LimitsError::RiskPerTrade(self.risk_per_trade_percent));
        }
        if !(self.max_daily_loss_percent > 0.0) {
            return Err(LimitsError::DailyLoss(self.max_daily_loss_percent));
        }
        if !(self.max_position_value > 0.0 && self.max_position_value.is_finite()) {
            return Err(LimitsError::PositionValue(self.max_position_value));
        }
        Ok(())
    }

    pub fn allows_symbol(&self, symbol: &str) -> bool {
        self.allowed_symbols.contains(symbol)
    }
}
