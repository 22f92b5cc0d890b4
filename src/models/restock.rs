use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::InStockProcessing;

/// Last known stock/price state of a single-product page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Restock {
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub availability: Option<String>,
    pub in_stock: Option<bool>,
    /// Baseline the price-change rules compare against.
    pub original_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestockSettings {
    pub in_stock_processing: InStockProcessing,
    pub follow_price_changes: bool,
    pub price_change_min: Option<Decimal>,
    pub price_change_max: Option<Decimal>,
    pub price_change_threshold_percent: Option<Decimal>,
}

impl RestockSettings {
    /// Lower band limit; zero counts as unset.
    pub fn min_limit(&self) -> Option<Decimal> {
        self.price_change_min.filter(|v| !v.is_zero())
    }

    /// Upper band limit; zero counts as unset.
    pub fn max_limit(&self) -> Option<Decimal> {
        self.price_change_max.filter(|v| !v.is_zero())
    }

    pub fn threshold_percent(&self) -> Option<Decimal> {
        self.price_change_threshold_percent.filter(|v| !v.is_zero())
    }
}

/// A watch group. When `overrides_watch` is set its restock settings win
/// over the settings of every watch carrying the tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Tag {
    pub uuid: String,
    pub title: String,
    pub overrides_watch: bool,
    pub restock_settings: RestockSettings,
}
