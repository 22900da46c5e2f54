//! Payload normalization
//!
//! Turns raw JSON payloads into typed records. Everything here is pure: no
//! I/O, no clock reads (the recency cutoff is passed in).
//!
//! Entries are never fatal. Each one either becomes a record or is dropped
//! with a [`DropReason`], and the reasons are tallied in [`DropStats`].

pub mod insider;
pub mod movers;

pub use insider::normalize_insider;
pub use movers::normalize_movers;

use chrono::{Days, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Date format used by the upstream `transaction_date` field
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Scale of the `DECIMAL(10, 2)` measure columns
pub const COLUMN_SCALE: u32 = 2;

/// Why an entry was not turned into a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    /// Policy: a mandatory key/date field is absent or empty
    MissingField(&'static str),
    /// Policy: older than the recency window
    OutsideWindow,
    /// Policy: same uniqueness key as an earlier entry in this run. The
    /// earlier record takes this entry's descriptive fields.
    Duplicate,
    /// Malformed: the date field does not match [`DATE_FORMAT`]
    BadDate,
    /// Malformed: the entry is not a JSON object
    NotAnObject,
}

impl DropReason {
    /// Expected data-quality filtering, as opposed to malformed input
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            DropReason::MissingField(_) | DropReason::OutsideWindow | DropReason::Duplicate
        )
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingField(field) => write!(f, "missing {field}"),
            DropReason::OutsideWindow => f.write_str("outside window"),
            DropReason::Duplicate => f.write_str("duplicate key"),
            DropReason::BadDate => f.write_str("unparseable date"),
            DropReason::NotAnObject => f.write_str("not an object"),
        }
    }
}

/// Per-entry normalization outcome
pub type Outcome<T> = Result<T, DropReason>;

/// Counts of dropped entries by reason
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropStats {
    counts: BTreeMap<DropReason, usize>,
}

impl DropStats {
    pub fn record(&mut self, reason: DropReason) {
        *self.counts.entry(reason).or_default() += 1;
    }

    pub fn count(&self, reason: DropReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn policy_drops(&self) -> usize {
        self.counts
            .iter()
            .filter(|(reason, _)| reason.is_policy())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn malformed(&self) -> usize {
        self.total() - self.policy_drops()
    }

    pub fn merge(&mut self, other: &DropStats) {
        for (reason, n) in &other.counts {
            *self.counts.entry(*reason).or_default() += n;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DropReason, usize)> + '_ {
        self.counts.iter().map(|(r, n)| (*r, *n))
    }
}

/// Normalizer output: kept records plus drop tallies
#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub records: T,
    pub input_entries: usize,
    pub drops: DropStats,
}

/// Recency window: keep records dated on or after `cutoff`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub cutoff: NaiveDate,
}

impl Window {
    pub fn new(cutoff: NaiveDate) -> Self {
        Self { cutoff }
    }

    /// Window covering the `days` days before `today`. A span reaching past
    /// the earliest representable date keeps everything.
    pub fn days_before(today: NaiveDate, days: u32) -> Self {
        Self::new(
            today
                .checked_sub_days(Days::new(u64::from(days)))
                .unwrap_or(NaiveDate::MIN),
        )
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.cutoff
    }
}

/// Parse a number leniently; `default` for absent, empty, non-numeric or
/// non-finite input.
pub fn coerce_f64(value: Option<&Value>, default: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_number(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(default)
}

/// Like [`coerce_f64`] but strips one trailing `%` first ("3.5%" -> 3.5)
pub fn coerce_percent(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            parse_number(trimmed.strip_suffix('%').unwrap_or(trimmed))
                .filter(|v| v.is_finite())
                .unwrap_or(default)
        }
        other => coerce_f64(other, default),
    }
}

/// Integer coercion for counts such as volume ("1234.0" -> 1234)
pub fn coerce_i64(value: Option<&Value>, default: i64) -> i64 {
    let v = coerce_f64(value, f64::NAN);
    if v.is_nan() || v < i64::MIN as f64 || v > i64::MAX as f64 {
        default
    } else {
        v.round() as i64
    }
}

/// Round a measure to [`COLUMN_SCALE`] the way Postgres stores a bound
/// float8 in a numeric column: 15 significant digits, then half away from
/// zero. Values outside the decimal range become zero.
pub fn to_column_scale(value: f64) -> Decimal {
    let mut rounded = Decimal::from_scientific(&format!("{value:.14e}"))
        .unwrap_or_default()
        .round_dp_with_strategy(COLUMN_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(COLUMN_SCALE);
    rounded
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

/// String field, `""` when absent or null. Scalars are rendered as text.
pub fn string_field(entry: &Map<String, Value>, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Mandatory non-empty string field
pub(crate) fn required_field(
    entry: &Map<String, Value>,
    key: &'static str,
) -> Outcome<String> {
    let value = string_field(entry, key);
    if value.trim().is_empty() {
        Err(DropReason::MissingField(key))
    } else {
        Ok(value)
    }
}
