//! Top gainers / losers / most active payloads

use super::{
    coerce_f64, coerce_i64, coerce_percent, required_field, DropReason, DropStats,
    Normalized, Outcome,
};
use crate::models::{MarketMover, MarketSnapshot, MoverCategory, SnapshotMetadata};
use serde_json::Value;
use std::collections::HashSet;

/// Normalize a movers snapshot.
///
/// `last_updated` is part of every row's key, so without it the whole
/// snapshot is dropped entry by entry and no metadata is produced.
pub fn normalize_movers(body: &Value) -> Normalized<MarketSnapshot> {
    let last_updated = body
        .get("last_updated")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let metadata = last_updated.map(|last_updated| SnapshotMetadata {
        last_updated: last_updated.to_string(),
        description: body
            .get("metadata")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    });

    let mut movers = Vec::new();
    let mut seen = HashSet::new();
    let mut drops = DropStats::default();
    let mut input_entries = 0;

    for category in MoverCategory::ALL {
        let entries = body
            .get(category.payload_key())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        input_entries += entries.len();

        for entry in entries {
            let outcome = match last_updated {
                Some(ts) => mover_entry(entry, category, ts),
                None => Err(DropReason::MissingField("last_updated")),
            }
            .and_then(|mover| {
                if seen.insert(mover.key()) {
                    Ok(mover)
                } else {
                    Err(DropReason::Duplicate)
                }
            });

            match outcome {
                Ok(mover) => movers.push(mover),
                Err(reason) => drops.record(reason),
            }
        }
    }

    Normalized {
        records: MarketSnapshot { metadata, movers },
        input_entries,
        drops,
    }
}

fn mover_entry(entry: &Value, category: MoverCategory, last_updated: &str) -> Outcome<MarketMover> {
    let entry = entry.as_object().ok_or(DropReason::NotAnObject)?;
    let ticker = required_field(entry, "ticker")?;

    Ok(MarketMover {
        ticker: ticker.trim().to_string(),
        price: coerce_f64(entry.get("price"), 0.0),
        change_amount: coerce_f64(entry.get("change_amount"), 0.0),
        change_percentage: coerce_percent(entry.get("change_percentage"), 0.0),
        volume: coerce_i64(entry.get("volume"), 0),
        category,
        last_updated: last_updated.to_string(),
    })
}

/// First few rows per category, for the extraction log
pub fn preview(snapshot: &MarketSnapshot, per_category: usize) -> Vec<String> {
    MoverCategory::ALL
        .iter()
        .flat_map(|category| {
            snapshot
                .category(*category)
                .into_iter()
                .take(per_category)
                .map(move |m| {
                    format!(
                        "{}: {} {} ({}%)",
                        category, m.ticker, m.price, m.change_percentage
                    )
                })
        })
        .collect()
}
