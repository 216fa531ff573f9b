//! Market data structures: snapshots, sparkline samples, history bars.

use serde::{Deserialize, Serialize};

use super::enums::Region;

/// Last known market state for one symbol.
///
/// Individual fields are optional because the bulk quote endpoint can return
/// partial rows; the history backfill path fills empty fields later without
/// ever overwriting populated ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MarketSnapshot {
    /// Last traded price.
    pub last_price: Option<f64>,

    /// Absolute change versus the previous close.
    pub change: Option<f64>,

    /// Percentage change versus the previous close.
    pub change_percent: Option<f64>,

    /// ISO currency code (e.g. `"USD"`, `"INR"`).
    pub currency: Option<String>,

    /// Sparkline samples, oldest first. Empty when the bulk endpoint had no
    /// series for the symbol.
    #[serde(default)]
    pub series: Vec<PricePoint>,
}

impl MarketSnapshot {
    /// Whether the snapshot carries sparkline samples.
    pub fn has_series(&self) -> bool {
        !self.series.is_empty()
    }
}

/// One sparkline sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Sample time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub price: f64,
}

/// One row of a historical range query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryBar {
    /// Bar open time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub open: f64,
    pub close: f64,
}

/// One symbol search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub name: String,
    pub region: Region,
}
