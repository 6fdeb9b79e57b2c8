//! Magnitude risk bands.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GateError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured KRW thresholds: `< low` is low, `< high` is medium, anything else is high.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBands {
    low: u64,
    high: u64,
}

impl RiskBands {
    pub fn new(low: u64, high: u64) -> Result<Self, GateError> {
        if low >= high {
            return Err(GateError::Configuration(format!(
                "risk bands must satisfy low < high (got low={low}, high={high})"
            )));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> u64 {
        self.low
    }

    pub fn high(&self) -> u64 {
        self.high
    }

    pub fn band(&self, notional: u64) -> RiskLevel {
        if notional < self.low {
            RiskLevel::Low
        } else if notional < self.high {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            low: 5_000_000,
            high: 50_000_000,
        }
    }
}
