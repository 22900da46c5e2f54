//! Extract → transform → load orchestration
//!
//! A [`Pipeline`] runs one dataset through three strictly sequential phases:
//!
//! 1. **Extracting**: one rate-limited fetch per work unit. A failed unit is
//!    recorded and skipped; the phase succeeds if at least one unit did.
//! 2. **Transforming**: normalize the payloads into one batch. Fails if the
//!    batch is empty.
//! 3. **Loading**: write the batch to the sink, then write the CSV backup
//!    whatever the load outcome. Succeeds only if both did.
//!
//! There are no retries. Loads are idempotent, so re-running is always safe.

pub mod dataset;

pub use dataset::{Dataset, InsiderDataset, MoversDataset};

use crate::fetch::{FetchError, JsonSource, RateLimitedFetcher};
use crate::load::{BatchSink, LoadError};
use crate::models::{RawPayload, RecordCount, WorkUnit};
use crate::normalize::DropStats;
use crate::snapshot::SnapshotWriter;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where a run is, or where it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Extracting => "extracting",
            PipelineState::Transforming => "transforming",
            PipelineState::Loading => "loading",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The working phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Extract,
    Transform,
    Load,
}

impl Phase {
    fn state(self) -> PipelineState {
        match self {
            Phase::Extract => PipelineState::Extracting,
            Phase::Transform => PipelineState::Transforming,
            Phase::Load => PipelineState::Loading,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Extract => "extraction",
            Phase::Transform => "transformation",
            Phase::Load => "loading",
        })
    }
}

/// Why a phase failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureCause {
    #[error("no work unit succeeded ({failed} failed)")]
    NothingFetched { failed: usize },

    #[error("no records left after normalization ({dropped} of {input} entries dropped)")]
    NothingProcessed { input: usize, dropped: usize },

    #[error("{0}")]
    Load(String),

    #[error("snapshot failed: {0}")]
    Snapshot(String),

    #[error("run cancelled")]
    Cancelled,
}

/// Terminal failure of a run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} phase failed: {cause}")]
pub struct PipelineFailure {
    pub phase: Phase,
    pub cause: FailureCause,
}

/// Outcome of one run, rendered as a phase-by-phase report by `Display`
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dataset: &'static str,
    pub state: PipelineState,
    pub failure: Option<PipelineFailure>,
    pub fetched: Vec<WorkUnit>,
    pub fetch_failures: Vec<(WorkUnit, FetchError)>,
    pub input_entries: usize,
    pub processed: usize,
    pub drops: DropStats,
    /// Rows inserted or updated by the sink
    pub loaded: Option<usize>,
    pub snapshots: Vec<PathBuf>,
    /// Reported separately so a load failure does not hide it
    pub snapshot_error: Option<String>,
}

impl RunReport {
    fn new(dataset: &'static str) -> Self {
        Self {
            dataset,
            state: PipelineState::Idle,
            failure: None,
            fetched: Vec::new(),
            fetch_failures: Vec::new(),
            input_entries: 0,
            processed: 0,
            drops: DropStats::default(),
            loaded: None,
            snapshots: Vec::new(),
            snapshot_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Completed
    }

    pub fn failed_phase(&self) -> Option<Phase> {
        self.failure.as_ref().map(|f| f.phase)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} pipeline: {} ===", self.dataset, self.state)?;

        writeln!(
            f,
            "extract:   {} unit(s) fetched, {} failed",
            self.fetched.len(),
            self.fetch_failures.len()
        )?;
        for (unit, err) in &self.fetch_failures {
            writeln!(f, "  - {unit}: {err}")?;
        }

        if self.input_entries > 0 || self.processed > 0 {
            writeln!(
                f,
                "transform: {} of {} entries kept ({} policy drops, {} malformed)",
                self.processed,
                self.input_entries,
                self.drops.policy_drops(),
                self.drops.malformed()
            )?;
        }

        if let Some(rows) = self.loaded {
            writeln!(f, "load:      {rows} row(s) inserted/updated")?;
        }
        for path in &self.snapshots {
            writeln!(f, "snapshot:  {}", path.display())?;
        }
        if let Some(err) = &self.snapshot_error {
            writeln!(f, "snapshot:  failed: {err}")?;
        }

        if let Some(failure) = &self.failure {
            write!(f, "FAILED: {failure}")?;
        } else {
            write!(f, "OK")?;
        }
        Ok(())
    }
}

/// One dataset wired to its source, sink and backup directory
pub struct Pipeline<D: Dataset, S> {
    fetcher: RateLimitedFetcher<S>,
    dataset: D,
    sink: Box<dyn BatchSink<D::Batch>>,
    writer: SnapshotWriter,
    state: PipelineState,
}

impl<D: Dataset, S: JsonSource> Pipeline<D, S> {
    pub fn new(
        fetcher: RateLimitedFetcher<S>,
        dataset: D,
        sink: Box<dyn BatchSink<D::Batch>>,
        writer: SnapshotWriter,
    ) -> Self {
        Self {
            fetcher,
            dataset,
            sink,
            writer,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Run all phases now
    pub async fn run(&mut self, cancel: &CancellationToken) -> RunReport {
        self.run_at(Local::now(), cancel).await
    }

    /// Run all phases with `now` as the reference time for the recency
    /// window and the snapshot file names.
    pub async fn run_at(&mut self, now: DateTime<Local>, cancel: &CancellationToken) -> RunReport {
        let mut report = RunReport::new(self.dataset.name());
        self.state = PipelineState::Idle;

        let result = self.run_phases(now, cancel, &mut report).await;
        match result {
            Ok(()) => {
                self.transition(PipelineState::Completed);
                info!(dataset = report.dataset, "Pipeline completed successfully");
            }
            Err(failure) => {
                self.transition(PipelineState::Failed);
                error!(dataset = report.dataset, error = %failure, "Pipeline failed");
                report.failure = Some(failure);
            }
        }
        report.state = self.state;
        report
    }

    async fn run_phases(
        &mut self,
        now: DateTime<Local>,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<(), PipelineFailure> {
        self.enter(Phase::Extract);
        let payloads = self.extract(cancel, report).await?;

        self.enter(Phase::Transform);
        if cancel.is_cancelled() {
            return Err(failure(Phase::Transform, FailureCause::Cancelled));
        }
        let normalized = self.dataset.transform(payloads, now.date_naive());
        report.input_entries = normalized.input_entries;
        report.processed = normalized.records.record_count();
        report.drops = normalized.drops;
        for (reason, count) in report.drops.iter() {
            info!(dataset = report.dataset, %reason, count, policy = reason.is_policy(), "Entries dropped");
        }
        if normalized.records.is_empty() {
            return Err(failure(
                Phase::Transform,
                FailureCause::NothingProcessed {
                    input: report.input_entries,
                    dropped: report.drops.total(),
                },
            ));
        }
        info!(
            dataset = report.dataset,
            records = report.processed,
            input = report.input_entries,
            "Transformation complete"
        );
        for line in self.dataset.preview(&normalized.records) {
            info!("  {line}");
        }

        self.enter(Phase::Load);
        let batch = normalized.records;
        let loaded = self.sink.load(&batch, cancel).await;

        match self.dataset.snapshot(&batch, &self.writer, now) {
            Ok(paths) => report.snapshots = paths,
            Err(e) => {
                warn!(error = %e, "Snapshot write failed");
                report.snapshot_error = Some(e.to_string());
            }
        }

        match loaded {
            Ok(rows) => report.loaded = Some(rows),
            Err(LoadError::Cancelled) => return Err(failure(Phase::Load, FailureCause::Cancelled)),
            Err(e) => return Err(failure(Phase::Load, FailureCause::Load(e.to_string()))),
        }
        if let Some(err) = &report.snapshot_error {
            return Err(failure(Phase::Load, FailureCause::Snapshot(err.clone())));
        }
        Ok(())
    }

    async fn extract(
        &mut self,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<Vec<RawPayload>, PipelineFailure> {
        let units = self.dataset.work_units();
        let total = units.len();
        let mut payloads = Vec::with_capacity(total);

        for (index, unit) in units.into_iter().enumerate() {
            info!(unit = %unit, "Fetching {} / {}", index + 1, total);
            match self.fetcher.fetch(&unit, cancel).await {
                Ok(payload) => {
                    report.fetched.push(unit);
                    payloads.push(payload);
                }
                Err(FetchError::Cancelled) => {
                    warn!(unit = %unit, "Extraction cancelled");
                    return Err(failure(Phase::Extract, FailureCause::Cancelled));
                }
                Err(e) => {
                    warn!(unit = %unit, error = %e, "Fetch failed, continuing with next unit");
                    report.fetch_failures.push((unit, e));
                }
            }
        }

        info!(
            succeeded = payloads.len(),
            failed = report.fetch_failures.len(),
            "Extraction complete"
        );

        if payloads.is_empty() {
            return Err(failure(
                Phase::Extract,
                FailureCause::NothingFetched {
                    failed: report.fetch_failures.len(),
                },
            ));
        }
        Ok(payloads)
    }

    fn enter(&mut self, phase: Phase) {
        self.transition(phase.state());
        info!("=== {} PHASE ===", phase.to_string().to_uppercase());
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }
}

fn failure(phase: Phase, cause: FailureCause) -> PipelineFailure {
    PipelineFailure { phase, cause }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fetch::RateLimiter;
    use crate::models::InsiderTransaction;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct StaticSource(Value);

    #[async_trait]
    impl JsonSource for StaticSource {
        async fn get_json(&self, _unit: &WorkUnit) -> Result<Value, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl JsonSource for FailingSource {
        async fn get_json(&self, _unit: &WorkUnit) -> Result<Value, FetchError> {
            Err(FetchError::Transport("connection reset".to_string()))
        }
    }

    #[derive(Default, Clone)]
    struct CountingSink {
        batches: Arc<Mutex<Vec<usize>>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchSink<Vec<InsiderTransaction>> for CountingSink {
        async fn load(
            &self,
            batch: &Vec<InsiderTransaction>,
            _cancel: &CancellationToken,
        ) -> Result<usize, LoadError> {
            if self.fail {
                return Err(LoadError::Connection("refused".to_string()));
            }
            self.batches.lock().unwrap().push(batch.len());
            Ok(batch.len())
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    }

    fn pipeline<S: JsonSource>(
        source: S,
        sink: CountingSink,
        dir: &TempDir,
    ) -> Pipeline<InsiderDataset, S> {
        Pipeline::new(
            RateLimitedFetcher::new(source, RateLimiter::disabled()),
            InsiderDataset::new(vec!["IBM".to_string()], None),
            Box::new(sink),
            SnapshotWriter::new(dir.path()),
        )
    }

    fn ibm_body() -> Value {
        json!({"data": [{
            "transaction_date": "2024-01-05",
            "shares": "100",
            "share_price": "",
            "executive": "J. Doe"
        }]})
    }

    #[tokio::test]
    async fn test_successful_run_completes() {
        let dir = TempDir::new().unwrap();
        let sink = CountingSink::default();
        let mut pipeline = pipeline(StaticSource(ibm_body()), sink.clone(), &dir);
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let report = pipeline.run_at(now(), &CancellationToken::new()).await;

        assert!(report.is_success(), "{report}");
        assert_eq!(pipeline.state(), PipelineState::Completed);
        assert_eq!(report.processed, 1);
        assert_eq!(report.loaded, Some(1));
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(*sink.batches.lock().unwrap(), vec![1]);
        assert!(report.to_string().ends_with("OK"));
    }

    #[tokio::test]
    async fn test_all_fetches_failing_stops_in_extract() {
        let dir = TempDir::new().unwrap();
        let sink = CountingSink::default();
        let mut pipeline = pipeline(FailingSource, sink.clone(), &dir);

        let report = pipeline.run_at(now(), &CancellationToken::new()).await;

        assert_eq!(report.state, PipelineState::Failed);
        assert_eq!(report.failed_phase(), Some(Phase::Extract));
        assert_eq!(report.fetch_failures.len(), 1);
        assert!(sink.batches.lock().unwrap().is_empty());
        assert!(report.snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_no_processed_records_stops_in_transform() {
        let dir = TempDir::new().unwrap();
        let sink = CountingSink::default();
        let body = json!({"data": [{"executive": "no date"}]});
        let mut pipeline = pipeline(StaticSource(body), sink.clone(), &dir);

        let report = pipeline.run_at(now(), &CancellationToken::new()).await;

        assert_eq!(report.failed_phase(), Some(Phase::Transform));
        assert_eq!(
            report.failure.unwrap().cause,
            FailureCause::NothingProcessed {
                input: 1,
                dropped: 1
            }
        );
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_still_writes_snapshot() {
        let dir = TempDir::new().unwrap();
        let sink = CountingSink {
            fail: true,
            ..CountingSink::default()
        };
        let mut pipeline = pipeline(StaticSource(ibm_body()), sink, &dir);

        let report = pipeline.run_at(now(), &CancellationToken::new()).await;

        assert_eq!(report.failed_phase(), Some(Phase::Load));
        assert!(matches!(report.failure.as_ref().unwrap().cause, FailureCause::Load(_)));
        assert_eq!(report.snapshots.len(), 1);
        assert!(report.snapshots[0].exists());
    }

    #[tokio::test]
    async fn test_snapshot_failure_fails_run_after_load() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let sink = CountingSink::default();
        let mut pipeline = Pipeline::new(
            RateLimitedFetcher::new(StaticSource(ibm_body()), RateLimiter::disabled()),
            InsiderDataset::new(vec!["IBM".to_string()], None),
            Box::new(sink.clone()),
            SnapshotWriter::new(&blocker),
        );

        let report = pipeline.run_at(now(), &CancellationToken::new()).await;

        assert_eq!(report.loaded, Some(1));
        assert!(matches!(report.failure.unwrap().cause, FailureCause::Snapshot(_)));
        assert_eq!(*sink.batches.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fails_in_extract() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut pipeline = pipeline(StaticSource(ibm_body()), CountingSink::default(), &dir);
        let report = pipeline.run_at(now(), &cancel).await;

        assert_eq!(
            report.failure,
            Some(PipelineFailure {
                phase: Phase::Extract,
                cause: FailureCause::Cancelled
            })
        );
    }

    #[test]
    fn test_failure_message_names_phase() {
        let failure = failure(Phase::Load, FailureCause::Load("Connection error: refused".into()));
        assert_eq!(failure.to_string(), "loading phase failed: Connection error: refused");
    }
}
