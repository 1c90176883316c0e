use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discount applied to a combined price when a forecast entry carries no
/// explicit export price. Export compensation is typically a fixed fraction
/// of the import tariff.
pub const EXPORT_DISCOUNT: f64 = 0.8;

/// One forecast price interval.
///
/// Providers differ in what they deliver: some send an import/export pair,
/// some a single combined `price`, some entries arrive with no usable field
/// at all. The optional fields model all three shapes; [`PriceEntry::resolve`]
/// collapses them into a concrete buy/sell pair exactly once, at the boundary
/// where forecasts enter the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl PriceEntry {
    /// Entry with an explicit import/export pair.
    pub fn paired(start: DateTime<Utc>, import_price: f64, export_price: f64) -> Self {
        Self {
            start,
            import_price: Some(import_price),
            export_price: Some(export_price),
            price: None,
        }
    }

    /// Entry with only a combined price.
    pub fn combined(start: DateTime<Utc>, price: f64) -> Self {
        Self {
            start,
            import_price: None,
            export_price: None,
            price: Some(price),
        }
    }

    /// Collapse to a `(buy, sell)` pair.
    ///
    /// Preference order per side: the explicit field, then the combined price
    /// (discounted for the export side), then the caller's scalar fallback.
    /// A malformed entry therefore degrades to current telemetry instead of
    /// failing the tick.
    pub fn resolve(&self, fallback_import: f64, fallback_export: f64) -> (f64, f64) {
        let buy = self.import_price.or(self.price).unwrap_or(fallback_import);
        let sell = self
            .export_price
            .or(self.price.map(|p| p * EXPORT_DISCOUNT))
            .unwrap_or(fallback_export);
        (buy, sell)
    }

    /// The buy side alone, with the same fallback rules.
    pub fn resolve_buy(&self, fallback_import: f64) -> f64 {
        self.import_price.or(self.price).unwrap_or(fallback_import)
    }
}

/// One forecast power interval (solar production or house load).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerEntry {
    pub start: DateTime<Utc>,
    pub kw: f64,
}

impl PowerEntry {
    pub fn new(start: DateTime<Utc>, kw: f64) -> Self {
        Self { start, kw }
    }
}
