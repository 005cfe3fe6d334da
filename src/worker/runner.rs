use super::cursor::{Cursor, CursorKey, CursorUpdate, Lane};
use super::shard::ShardSpec;
use crate::config::WorkerConfig;
use crate::core::{Result, SyncError};
use crate::storage::CursorStore;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::Instrument;

/// A resumable job processed in cursor-ordered batches over one shard.
///
/// `persist` must write the output and the cursor in one atomic step; a
/// crash between batches then resumes exactly after the last committed one.
#[async_trait]
pub trait BatchJob: Send + Sync {
    type Row: Send + Sync + 'static;
    type Output: Send + 'static;

    /// Name under which cursors and topology are stored.
    fn worker_class(&self) -> &'static str;

    /// Lanes in priority order.
    fn lanes(&self) -> Vec<Lane> {
        vec![Lane::Fresh]
    }

    /// Whether `lane` restarts from its initial cursor once every lane is idle.
    fn rescan_on_idle(&self, _lane: Lane) -> bool {
        false
    }

    /// Cursor used when none has been persisted yet.
    fn initial_cursor(&self, lane: Lane) -> Result<Cursor>;

    async fn fetch_batch(
        &self,
        lane: Lane,
        cursor: Cursor,
        shard: ShardSpec,
        limit: usize,
    ) -> Result<Vec<Self::Row>>;

    /// Cursor positioned on the last row of a non-empty batch.
    fn cursor_after(&self, rows: &[Self::Row]) -> Option<Cursor>;

    async fn compute(&self, lane: Lane, rows: Vec<Self::Row>) -> Result<Self::Output>;

    /// Returns the number of result rows written.
    async fn persist(&self, output: Self::Output, cursor: CursorUpdate) -> Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub lane: Lane,
    pub rows: usize,
    pub written: usize,
    pub cursor: Cursor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub rows: usize,
    pub written: usize,
    pub failures: u64,
}

impl RunSummary {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.rows += report.rows;
        self.written += report.written;
    }
}

/// Creates a linked stop handle and signal.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested or every handle is gone.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Drives a [`BatchJob`] for one shard: stale-first lanes, persisted cursors,
/// idle sleep once every lane is drained.
pub struct BatchRunner<J: BatchJob> {
    job: J,
    cursors: Arc<dyn CursorStore>,
    config: WorkerConfig,
    shard: ShardSpec,
    rescanning: Mutex<HashSet<Lane>>,
}

impl<J: BatchJob> BatchRunner<J> {
    /// Validate the shard configuration and register the topology.
    ///
    /// Fails with `ShardMisconfigured` when the index is out of range or the
    /// shard count differs from the one cursors were written with.
    pub async fn start(job: J, cursors: Arc<dyn CursorStore>, config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let shard = config.shard_spec()?;
        cursors
            .register_topology(job.worker_class(), shard.count())
            .await?;
        tracing::info!(
            worker = job.worker_class(),
            shard = %shard,
            batch_size = config.batch_size,
            "batch runner started"
        );
        Ok(Self {
            job,
            cursors,
            config,
            shard,
            rescanning: Mutex::new(HashSet::new()),
        })
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn shard(&self) -> ShardSpec {
        self.shard
    }

    fn cursor_key(&self, lane: Lane) -> CursorKey {
        CursorKey::new(self.job.worker_class(), self.shard.index(), lane)
    }

    async fn resume_point(&self, lane: Lane) -> Result<Cursor> {
        if self.rescanning.lock()?.contains(&lane) {
            return self.job.initial_cursor(lane);
        }
        match self.cursors.load_cursor(&self.cursor_key(lane)).await? {
            Some(stored) => Ok(stored),
            None => self.job.initial_cursor(lane),
        }
    }

    /// Restart rescannable lanes from their initial cursor. Returns whether any lane restarts.
    fn begin_rescan(&self) -> Result<bool> {
        let lanes: Vec<Lane> = self
            .job
            .lanes()
            .into_iter()
            .filter(|lane| self.job.rescan_on_idle(*lane))
            .collect();
        let mut rescanning = self.rescanning.lock()?;
        rescanning.extend(lanes.iter().copied());
        Ok(!lanes.is_empty())
    }

    /// Process one batch from the first lane that has rows.
    ///
    /// Returns `None` when every lane is empty.
    pub async fn next_batch(&self) -> Result<Option<BatchReport>> {
        for lane in self.job.lanes() {
            let span = tracing::info_span!(
                "batch",
                worker = self.job.worker_class(),
                shard = %self.shard,
                lane = %lane
            );
            if let Some(report) = self.lane_batch(lane).instrument(span).await? {
                return Ok(Some(report));
            }
        }
        Ok(None)
    }

    async fn lane_batch(&self, lane: Lane) -> Result<Option<BatchReport>> {
        let started = Instant::now();
        let cursor = self.resume_point(lane).await?;
        let rows = self
            .job
            .fetch_batch(lane, cursor, self.shard, self.config.batch_size)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let row_count = rows.len();
        let next = self.job.cursor_after(&rows).unwrap_or(cursor);
        let output = self.job.compute(lane, rows).await?;
        let written = self
            .job
            .persist(output, CursorUpdate::new(self.cursor_key(lane), next))
            .await?;
        self.rescanning.lock()?.remove(&lane);

        tracing::info!(
            rows = row_count,
            written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch committed"
        );
        Ok(Some(BatchReport {
            lane,
            rows: row_count,
            written,
            cursor: next,
        }))
    }

    fn limit_reached(&self, summary: &RunSummary) -> bool {
        self.config.max_batches > 0 && summary.batches >= self.config.max_batches
    }

    /// Drain every lane until idle (one rescan included), then return.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut rescanned = false;
        loop {
            match self.next_batch().await? {
                Some(report) => {
                    summary.record(&report);
                    if self.limit_reached(&summary) {
                        break;
                    }
                }
                None => {
                    if rescanned || !self.begin_rescan()? {
                        break;
                    }
                    rescanned = true;
                }
            }
        }
        Ok(summary)
    }

    /// Run until stopped or `max_batches` is reached.
    ///
    /// A failed batch is logged and retried after the idle interval; its
    /// cursor has not moved, so no rows are lost.
    pub async fn run(&self, mut stop: StopSignal) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        while !stop.is_stopped() {
            let pause = match self.next_batch().await {
                Ok(Some(report)) => {
                    summary.record(&report);
                    if self.limit_reached(&summary) {
                        tracing::info!(batches = summary.batches, "max_batches reached");
                        break;
                    }
                    self.config.batch_pause
                }
                Ok(None) => {
                    self.begin_rescan()?;
                    tracing::debug!(
                        sleep_secs = self.config.idle_sleep_interval.as_secs_f64(),
                        "all lanes idle"
                    );
                    self.config.idle_sleep_interval
                }
                Err(SyncError::ShardMisconfigured(msg)) => {
                    return Err(SyncError::ShardMisconfigured(msg));
                }
                Err(err) => {
                    summary.failures += 1;
                    tracing::error!(error = %err, "batch failed, cursor not advanced");
                    self.config.idle_sleep_interval
                }
            };

            if pause.is_zero() {
                continue;
            }
            tokio::select! {
                _ = stop.stopped() => break,
                _ = sleep(pause) => {}
            }
        }

        tracing::info!(
            batches = summary.batches,
            rows = summary.rows,
            failures = summary.failures,
            "batch runner stopped"
        );
        Ok(summary)
    }
}

/// A runner executing on a background task.
pub struct BatchWorker {
    stop: StopHandle,
    join_handle: Option<JoinHandle<Result<RunSummary>>>,
}

impl BatchWorker {
    pub fn spawn<J: BatchJob + 'static>(runner: Arc<BatchRunner<J>>) -> Self {
        let (stop, signal) = stop_channel();
        let join_handle = tokio::spawn(async move { runner.run(signal).await });
        Self {
            stop,
            join_handle: Some(join_handle),
        }
    }

    /// Signal the worker to stop and wait for its summary.
    pub async fn stop(mut self) -> Result<RunSummary> {
        self.stop.stop();
        match self.join_handle.take() {
            Some(join_handle) => join_handle
                .await
                .map_err(|err| SyncError::Storage(format!("batch worker join: {}", err)))?,
            None => Ok(RunSummary::default()),
        }
    }
}

impl Drop for BatchWorker {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
