//! Records flowing through the pipeline
//!
//! [`WorkUnit`] and [`RawPayload`] live only during extraction. The processed
//! records ([`InsiderTransaction`], [`MarketMover`]) are what the loaders and
//! the CSV snapshot consume.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// API function for insider transactions (one request per symbol)
pub const INSIDER_TRANSACTIONS: &str = "INSIDER_TRANSACTIONS";

/// API function for the top gainers / losers / most active snapshot
pub const TOP_GAINERS_LOSERS: &str = "TOP_GAINERS_LOSERS";

/// One extraction request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub function: String,
    pub symbol: Option<String>,
}

impl WorkUnit {
    pub fn for_symbol(function: &str, symbol: impl Into<String>) -> Self {
        Self {
            function: function.to_string(),
            symbol: Some(symbol.into()),
        }
    }

    pub fn market_wide(function: &str) -> Self {
        Self {
            function: function.to_string(),
            symbol: None,
        }
    }

    /// Query parameters for this unit, without the credential
    pub fn query_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("function", self.function.as_str())];
        if let Some(symbol) = &self.symbol {
            params.push(("symbol", symbol.as_str()));
        }
        params
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}:{}", self.function, symbol),
            None => f.write_str(&self.function),
        }
    }
}

/// Unparsed response body for one work unit
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub unit: WorkUnit,
    pub body: serde_json::Value,
}

/// A normalized insider transaction (fact table row)
///
/// `shares` and `price` are already rounded to the `DECIMAL(10, 2)` column
/// scale, so the values bound at load time are the values stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsiderTransaction {
    pub symbol: String,
    pub date: NaiveDate,
    pub executive: String,
    pub title: String,
    #[serde(rename = "type")]
    pub security_type: String,
    pub transaction: String,
    pub shares: Decimal,
    pub price: Decimal,
}

/// Natural key of an insider transaction: `(symbol, date, executive, shares, price)`.
///
/// Two records with equal keys are the same row of `insider_transactions`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsiderKey {
    pub symbol: String,
    pub date: NaiveDate,
    pub executive: String,
    pub shares: Decimal,
    pub price: Decimal,
}

impl InsiderTransaction {
    pub fn key(&self) -> InsiderKey {
        InsiderKey {
            symbol: self.symbol.clone(),
            date: self.date,
            executive: self.executive.clone(),
            shares: self.shares,
            price: self.price,
        }
    }

    /// Take the descriptive fields of a later record with the same key, as
    /// the fact table's conflict update does
    pub fn update_descriptive(&mut self, later: InsiderTransaction) {
        self.title = later.title;
        self.security_type = later.security_type;
        self.transaction = later.transaction;
    }
}

/// Mover category as stored in `stock_movers.category`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MoverCategory {
    Gainers,
    Losers,
    Active,
}

impl MoverCategory {
    pub const ALL: [MoverCategory; 3] =
        [MoverCategory::Gainers, MoverCategory::Losers, MoverCategory::Active];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoverCategory::Gainers => "gainers",
            MoverCategory::Losers => "losers",
            MoverCategory::Active => "active",
        }
    }

    /// Key of this category's list in the upstream payload
    pub fn payload_key(&self) -> &'static str {
        match self {
            MoverCategory::Gainers => "top_gainers",
            MoverCategory::Losers => "top_losers",
            MoverCategory::Active => "most_actively_traded",
        }
    }
}

impl fmt::Display for MoverCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized market mover (snapshot table row)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketMover {
    pub ticker: String,
    pub price: f64,
    pub change_amount: f64,
    pub change_percentage: f64,
    pub volume: i64,
    pub category: MoverCategory,
    pub last_updated: String,
}

impl MarketMover {
    /// Natural key: `(ticker, category, last_updated)`
    pub fn key(&self) -> (String, MoverCategory, String) {
        (self.ticker.clone(), self.category, self.last_updated.clone())
    }
}

/// Snapshot-level metadata, keyed by `last_updated`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotMetadata {
    pub last_updated: String,
    pub description: String,
}

/// One full movers snapshot: metadata plus every category's rows
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub metadata: Option<SnapshotMetadata>,
    pub movers: Vec<MarketMover>,
}

impl MarketSnapshot {
    /// Rows of one category, in upstream order
    pub fn category(&self, category: MoverCategory) -> Vec<&MarketMover> {
        self.movers.iter().filter(|m| m.category == category).collect()
    }
}

/// Number of processed records in a batch
pub trait RecordCount {
    fn record_count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

impl<T> RecordCount for Vec<T> {
    fn record_count(&self) -> usize {
        self.len()
    }
}

impl RecordCount for MarketSnapshot {
    fn record_count(&self) -> usize {
        self.movers.len()
    }
}
