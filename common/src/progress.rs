//! Track and report sync progress.
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Progress of one sync run.
///
/// Counters are updated by the controller that owns the run and read by the
/// reporter through [SyncProgress::snapshot].
#[derive(Debug)]
pub struct SyncProgress {
    started_at: Instant,
    total_blocks: AtomicU64,
    processed_blocks: AtomicU64,
    saved: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    state: Mutex<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    last_block: Option<u64>,
    wait: Option<Wait>,
}

#[derive(Debug, Clone, Copy)]
struct Wait {
    started_at: Instant,
    duration: Duration,
}

/// A copy of the progress at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub uptime: Duration,
    /// Number of blocks to process, if known.
    pub total_blocks: Option<u64>,
    pub processed_blocks: u64,
    pub saved: u64,
    pub skipped: u64,
    pub errors: u64,
    pub last_block: Option<u64>,
    /// Remaining time of the cooldown in progress, if any.
    pub cooldown_remaining: Option<Duration>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_blocks: AtomicU64::new(0),
            processed_blocks: AtomicU64::new(0),
            saved: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn set_total_blocks(&self, total: u64) {
        self.total_blocks.store(total, Ordering::Relaxed);
    }

    pub fn block_processed(&self, block_number: u64) {
        self.processed_blocks.fetch_add(1, Ordering::Relaxed);
        self.state().last_block = Some(block_number);
    }

    /// Mark `count` blocks processed at once, up to `last_block`.
    pub fn blocks_processed(&self, count: u64, last_block: u64) {
        self.processed_blocks.fetch_add(count, Ordering::Relaxed);
        self.state().last_block = Some(last_block);
    }

    pub fn record_saved(&self) {
        self.saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the start of a cooldown of `duration`.
    pub fn begin_wait(&self, duration: Duration) {
        self.state().wait = Some(Wait {
            started_at: Instant::now(),
            duration,
        });
    }

    pub fn end_wait(&self) {
        self.state().wait = None;
    }

    pub fn is_waiting(&self) -> bool {
        self.state().wait.is_some()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let (last_block, wait) = {
            let state = self.state();
            (state.last_block, state.wait)
        };

        let total_blocks = match self.total_blocks.load(Ordering::Relaxed) {
            0 => None,
            total => Some(total),
        };

        ProgressSnapshot {
            uptime: self.started_at.elapsed(),
            total_blocks,
            processed_blocks: self.processed_blocks.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_block,
            cooldown_remaining: wait
                .map(|wait| wait.duration.saturating_sub(wait.started_at.elapsed())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        // The state is always left consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSnapshot {
    /// Percentage of blocks processed, if the total is known.
    pub fn percent(&self) -> Option<f64> {
        self.total_blocks
            .map(|total| (self.processed_blocks as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Log the snapshot.
    pub fn log(&self, name: &str) {
        info!(
            sync = name,
            processed = self.processed_blocks,
            saved = self.saved,
            skipped = self.skipped,
            errors = self.errors,
            last_block = ?self.last_block,
            "{}",
            self
        );
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uptime {}", format_duration(self.uptime))?;

        match (self.total_blocks, self.percent()) {
            (Some(total), Some(percent)) => write!(
                f,
                " | blocks {}/{} ({:.1}%)",
                self.processed_blocks, total, percent
            )?,
            _ => write!(f, " | blocks {}", self.processed_blocks)?,
        }

        write!(
            f,
            " | saved {} | skipped {} | errors {}",
            self.saved, self.skipped, self.errors
        )?;

        if let Some(last_block) = self.last_block {
            write!(f, " | last block {}", last_block)?;
        }

        if let Some(remaining) = self.cooldown_remaining {
            write!(f, " | cooldown, {} remaining", format_duration(remaining))?;
        }

        Ok(())
    }
}

/// Log the progress every `interval` until `ct` is cancelled.
pub fn spawn_reporter(
    name: impl Into<String>,
    progress: Arc<SyncProgress>,
    interval: Duration,
    ct: CancellationToken,
) -> JoinHandle<()> {
    let name = name.into();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = ticker.tick() => {
                    progress.snapshot().log(&name);
                }
            }
        }
    })
}

/// Format as `1h 02m 03s`, omitting leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
