use crate::core::{Result, SyncError, Timestamp};
use crate::worker::ShardSpec;
use std::time::Duration;

/// Default number of inline timeline entries kept on a cached entity.
pub const DEFAULT_HISTORY_CAP: usize = 500;

/// Longest accepted lookback or staleness window, in days.
pub const MAX_WINDOW_DAYS: u64 = 3650;

const SECS_PER_DAY: u64 = 86_400;

/// Diff engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum inline history entries per cached entity
    pub history_cap: usize,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    /// Set the inline history cap
    pub fn history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_cap == 0 {
            return Err(SyncError::Config("history_cap must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Sharded batch worker configuration
///
/// Every instance of one worker class must agree on `shard_count`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Total number of shards the id space is split into
    pub shard_count: u32,

    /// Shard handled by this instance
    pub shard_index: u32,

    /// Maximum rows per fetched batch
    pub batch_size: usize,

    /// How far back a cold start (or an activity lookup) reaches
    pub lookback_window: Duration,

    /// Age after which a derived result is recomputed
    pub staleness_threshold: Duration,

    /// Sleep after a scan finds nothing to do
    pub idle_sleep_interval: Duration,

    /// Pause between non-empty batches
    pub batch_pause: Duration,

    /// Stop after this many batches (0 = unbounded)
    pub max_batches: u64,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self {
            shard_count: 1,
            shard_index: 0,
            batch_size: 1000,
            lookback_window: Duration::from_secs(90 * 24 * 3600), // 90 days
            staleness_threshold: Duration::from_secs(7 * 24 * 3600), // 7 days
            idle_sleep_interval: Duration::from_secs(300),
            batch_pause: Duration::ZERO,
            max_batches: 0,
        }
    }

    /// Read `WORKER_*` variables. Missing or unparsable values fall back to
    /// the defaults; numbers that parse but do not fit are refused.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`WorkerConfig::from_env`] with an injectable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();
        let int = |name: &str| -> Option<u64> {
            lookup(name).and_then(|raw| raw.trim().parse::<u64>().ok())
        };
        let shard = |name: &str, default: u32| -> Result<u32> {
            match int(name) {
                Some(value) => u32::try_from(value)
                    .map_err(|_| SyncError::Config(format!("{} out of range: {}", name, value))),
                None => Ok(default),
            }
        };
        let secs = |name: &str, default: Duration| -> Result<Duration> {
            let value = lookup(name)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite() && *value >= 0.0);
            match value {
                Some(value) => Duration::try_from_secs_f64(value)
                    .map_err(|e| SyncError::Config(format!("{} out of range: {}", name, e))),
                None => Ok(default),
            }
        };
        let days = |name: &str, default: Duration| -> Result<Duration> {
            match int(name) {
                Some(value) => days_window(value.max(1), name),
                None => Ok(default),
            }
        };

        let batch_size = int("WORKER_BATCH_SIZE").unwrap_or(defaults.batch_size as u64).max(1);
        Ok(Self {
            shard_count: shard("WORKER_SHARDS", defaults.shard_count)?,
            shard_index: shard("WORKER_INDEX", defaults.shard_index)?,
            batch_size: usize::try_from(batch_size).map_err(|_| {
                SyncError::Config(format!("WORKER_BATCH_SIZE out of range: {}", batch_size))
            })?,
            lookback_window: days("WORKER_LOOKBACK_DAYS", defaults.lookback_window)?,
            staleness_threshold: days("WORKER_STALE_DAYS", defaults.staleness_threshold)?,
            idle_sleep_interval: secs("WORKER_IDLE_SECS", defaults.idle_sleep_interval)?,
            batch_pause: secs("WORKER_SLEEP_SECS", defaults.batch_pause)?,
            max_batches: int("WORKER_MAX_BATCHES").unwrap_or(defaults.max_batches),
        })
    }

    /// Set the shard assignment
    pub fn shard(mut self, index: u32, count: u32) -> Self {
        self.shard_index = index;
        self.shard_count = count;
        self
    }

    /// Set batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set lookback window
    pub fn lookback_window(mut self, window: Duration) -> Self {
        self.lookback_window = window;
        self
    }

    /// Set staleness threshold
    pub fn staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Set idle sleep interval
    pub fn idle_sleep_interval(mut self, interval: Duration) -> Self {
        self.idle_sleep_interval = interval;
        self
    }

    /// Set pause between batches
    pub fn batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Set batch limit
    pub fn max_batches(mut self, max: u64) -> Self {
        self.max_batches = max;
        self
    }

    /// Reject configurations that would misroute entities.
    pub fn validate(&self) -> Result<()> {
        ShardSpec::new(self.shard_index, self.shard_count)?;
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be positive".to_string()));
        }
        if self.lookback_window.is_zero() {
            return Err(SyncError::Config(
                "lookback_window must be positive".to_string(),
            ));
        }
        check_window(self.lookback_window, "lookback_window")?;
        check_window(self.staleness_threshold, "staleness_threshold")?;
        Ok(())
    }

    pub fn shard_spec(&self) -> Result<ShardSpec> {
        ShardSpec::new(self.shard_index, self.shard_count)
    }

    pub fn lookback(&self) -> Result<chrono::Duration> {
        check_window(self.lookback_window, "lookback_window")?;
        to_chrono(self.lookback_window, "lookback_window")
    }

    pub fn staleness(&self) -> Result<chrono::Duration> {
        check_window(self.staleness_threshold, "staleness_threshold")?;
        to_chrono(self.staleness_threshold, "staleness_threshold")
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A window of `days` whole days, refused past [`MAX_WINDOW_DAYS`].
pub fn days_window(days: u64, name: &str) -> Result<Duration> {
    if days > MAX_WINDOW_DAYS {
        return Err(SyncError::Config(format!(
            "{} of {} days exceeds {} days",
            name, days, MAX_WINDOW_DAYS
        )));
    }
    days
        .checked_mul(SECS_PER_DAY)
        .map(Duration::from_secs)
        .ok_or_else(|| SyncError::Config(format!("{} out of range: {} days", name, days)))
}

/// `now` moved back by `window`, or a config error when that leaves the
/// representable range.
pub fn window_start(now: Timestamp, window: chrono::Duration) -> Result<Timestamp> {
    now.checked_sub_signed(window).ok_or_else(|| {
        SyncError::Config(format!(
            "window of {}s reaches past the supported date range",
            window.num_seconds()
        ))
    })
}

fn check_window(window: Duration, name: &str) -> Result<()> {
    if window.as_secs() > MAX_WINDOW_DAYS * SECS_PER_DAY {
        return Err(SyncError::Config(format!("{} exceeds {} days", name, MAX_WINDOW_DAYS)));
    }
    Ok(())
}

fn to_chrono(duration: Duration, name: &str) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| SyncError::Config(format!("{} out of range: {}", name, e)))
}
