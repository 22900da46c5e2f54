//! The two datasets the pipeline knows how to run

use crate::models::{
    InsiderTransaction, MarketSnapshot, MoverCategory, RawPayload, RecordCount, WorkUnit,
    INSIDER_TRANSACTIONS, TOP_GAINERS_LOSERS,
};
use crate::normalize::{movers, normalize_insider, normalize_movers, DropStats, Normalized, Window};
use crate::snapshot::{SnapshotError, SnapshotWriter};
use chrono::{DateTime, Local, NaiveDate};
use std::path::PathBuf;
use tracing::debug;

/// What a pipeline run extracts, how it normalizes it, and how it is backed up.
///
/// Implementations hold only configuration. Every phase output is returned
/// to the orchestrator, which hands it to the next phase.
pub trait Dataset: Send + Sync {
    type Batch: RecordCount + Send + Sync;

    /// Short name used in logs and the run report
    fn name(&self) -> &'static str;

    fn work_units(&self) -> Vec<WorkUnit>;

    /// Turn the successfully fetched payloads into one batch
    fn transform(&self, payloads: Vec<RawPayload>, today: NaiveDate) -> Normalized<Self::Batch>;

    /// Write the CSV backup(s) for `batch`
    fn snapshot(
        &self,
        batch: &Self::Batch,
        writer: &SnapshotWriter,
        now: DateTime<Local>,
    ) -> Result<Vec<PathBuf>, SnapshotError>;

    /// A few human-readable lines describing `batch`
    fn preview(&self, _batch: &Self::Batch) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// Insider transactions
// ============================================================================

/// Insider transactions, one work unit per symbol
#[derive(Debug, Clone)]
pub struct InsiderDataset {
    pub symbols: Vec<String>,
    /// Keep transactions from the last `window_days` days; `None` keeps all
    pub window_days: Option<u32>,
}

impl InsiderDataset {
    pub const SNAPSHOT_NAME: &'static str = "insider_transactions";

    pub fn new(symbols: Vec<String>, window_days: Option<u32>) -> Self {
        Self {
            symbols,
            window_days,
        }
    }
}

impl Dataset for InsiderDataset {
    type Batch = Vec<InsiderTransaction>;

    fn name(&self) -> &'static str {
        "insider"
    }

    fn work_units(&self) -> Vec<WorkUnit> {
        self.symbols
            .iter()
            .map(|symbol| WorkUnit::for_symbol(INSIDER_TRANSACTIONS, symbol.as_str()))
            .collect()
    }

    fn transform(&self, payloads: Vec<RawPayload>, today: NaiveDate) -> Normalized<Self::Batch> {
        let window = self.window_days.map(|days| Window::days_before(today, days));

        let mut records = Vec::new();
        let mut input_entries = 0;
        let mut drops = DropStats::default();

        for payload in payloads {
            let symbol = payload.unit.symbol.as_deref().unwrap_or_default();
            let normalized = normalize_insider(&payload.body, symbol, window);
            debug!(
                symbol,
                kept = normalized.records.len(),
                dropped = normalized.drops.total(),
                "Normalized insider payload"
            );

            input_entries += normalized.input_entries;
            drops.merge(&normalized.drops);
            records.extend(normalized.records);
        }

        Normalized {
            records,
            input_entries,
            drops,
        }
    }

    fn snapshot(
        &self,
        batch: &Self::Batch,
        writer: &SnapshotWriter,
        now: DateTime<Local>,
    ) -> Result<Vec<PathBuf>, SnapshotError> {
        Ok(vec![writer.write(Self::SNAPSHOT_NAME, batch, now)?])
    }
}

// ============================================================================
// Market movers
// ============================================================================

/// Top gainers, losers and most active tickers: one market-wide work unit
#[derive(Debug, Clone, Copy, Default)]
pub struct MoversDataset;

impl MoversDataset {
    /// Rows shown per category in the extraction preview
    pub const PREVIEW_ROWS: usize = 3;

    pub fn snapshot_name(category: MoverCategory) -> String {
        format!("stock_{category}")
    }
}

impl Dataset for MoversDataset {
    type Batch = MarketSnapshot;

    fn name(&self) -> &'static str {
        "movers"
    }

    fn work_units(&self) -> Vec<WorkUnit> {
        vec![WorkUnit::market_wide(TOP_GAINERS_LOSERS)]
    }

    /// There is a single work unit; should several payloads arrive, the
    /// last one is the most recent snapshot and wins.
    fn transform(&self, payloads: Vec<RawPayload>, _today: NaiveDate) -> Normalized<Self::Batch> {
        match payloads.last() {
            Some(payload) => normalize_movers(&payload.body),
            None => Normalized {
                records: MarketSnapshot {
                    metadata: None,
                    movers: Vec::new(),
                },
                input_entries: 0,
                drops: DropStats::default(),
            },
        }
    }

    /// One file per category, including empty ones
    fn snapshot(
        &self,
        batch: &Self::Batch,
        writer: &SnapshotWriter,
        now: DateTime<Local>,
    ) -> Result<Vec<PathBuf>, SnapshotError> {
        MoverCategory::ALL
            .iter()
            .map(|category| {
                writer.write(&Self::snapshot_name(*category), &batch.category(*category), now)
            })
            .collect()
    }

    fn preview(&self, batch: &Self::Batch) -> Vec<String> {
        movers::preview(batch, Self::PREVIEW_ROWS)
    }
}
