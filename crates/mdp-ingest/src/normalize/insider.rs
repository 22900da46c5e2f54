//! Insider transaction payloads (`{"data": [ ... ]}`)

use super::{
    coerce_f64, required_field, string_field, to_column_scale, DropReason, DropStats, Normalized,
    Outcome, Window, DATE_FORMAT,
};
use crate::models::{InsiderKey, InsiderTransaction};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

const DATE_FIELD: &str = "transaction_date";

/// Normalize one symbol's insider transaction payload.
///
/// Entries without a parseable `transaction_date` or outside `window` are
/// dropped. An entry repeating an earlier entry's uniqueness key is counted as
/// a duplicate and its descriptive fields overwrite the earlier record's, so
/// the last entry wins as it would in the fact table. A payload without a
/// `data` array yields no records.
pub fn normalize_insider(
    body: &Value,
    symbol: &str,
    window: Option<Window>,
) -> Normalized<Vec<InsiderTransaction>> {
    let entries = body
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut records: Vec<InsiderTransaction> = Vec::with_capacity(entries.len());
    let mut positions: HashMap<InsiderKey, usize> = HashMap::new();
    let mut drops = DropStats::default();

    for entry in entries {
        match insider_entry(entry, symbol, window) {
            Ok(record) => match positions.entry(record.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(records.len());
                    records.push(record);
                }
                Entry::Occupied(slot) => {
                    records[*slot.get()].update_descriptive(record);
                    drops.record(DropReason::Duplicate);
                }
            },
            Err(reason) => drops.record(reason),
        }
    }

    Normalized {
        records,
        input_entries: entries.len(),
        drops,
    }
}

fn insider_entry(
    entry: &Value,
    symbol: &str,
    window: Option<Window>,
) -> Outcome<InsiderTransaction> {
    let entry = entry.as_object().ok_or(DropReason::NotAnObject)?;

    let raw_date = required_field(entry, DATE_FIELD)?;
    let date =
        NaiveDate::parse_from_str(raw_date.trim(), DATE_FORMAT).map_err(|_| DropReason::BadDate)?;

    if window.is_some_and(|w| !w.contains(date)) {
        return Err(DropReason::OutsideWindow);
    }

    Ok(InsiderTransaction {
        symbol: symbol.to_string(),
        date,
        executive: string_field(entry, "executive"),
        title: string_field(entry, "executive_title"),
        security_type: string_field(entry, "security_type"),
        transaction: string_field(entry, "acquisition_or_disposal"),
        shares: to_column_scale(coerce_f64(entry.get("shares"), 0.0)),
        price: to_column_scale(coerce_f64(entry.get("share_price"), 0.0)),
    })
}
