//! Periodic scheduler for Echelon's background sweeps.
//!
//! The session registry runs two housekeeping loops, the expiry sweep
//! and the game-server liveness sweep, each on a fixed period of a few
//! seconds. [`TickScheduler`] owns the timing of one such loop: when the
//! next run is due, skipping ahead when a run took longer than the
//! period, and warning when a sweep is eating most of its interval.
//!
//! # Disabled mode
//!
//! A period of zero disables the loop: [`TickScheduler::wait_for_tick`]
//! pends forever, so a `tokio::select!` around it only ever takes its
//! other branches.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         _ = scheduler.wait_for_tick() => {
//!             registry.expire_stale().await;
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Fraction of the period above which a run's duration is logged as a
/// warning.
pub const BUDGET_WARN_FRACTION: f64 = 0.5;

/// Full configuration for one periodic loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between runs. `Duration::ZERO` disables the loop.
    pub period: Duration,
    /// Upper bound of the random delay added to the first run so that
    /// loops started together don't stay in lockstep.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: Duration::ZERO,
            initial_jitter: Duration::from_millis(250),
        }
    }
}

impl TickConfig {
    /// Shortest period accepted; anything between zero and this is raised.
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    /// A config running every `period` with default settings.
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]:
    /// - a non-zero `period` is raised to at least [`Self::MIN_PERIOD`];
    /// - `initial_jitter` is capped at one period.
    pub fn validated(mut self) -> Self {
        if !self.period.is_zero() && self.period < Self::MIN_PERIOD {
            warn!(
                period = ?self.period,
                min = ?Self::MIN_PERIOD,
                "period below minimum, raising"
            );
            self.period = Self::MIN_PERIOD;
        }
        if self.initial_jitter > self.period {
            self.initial_jitter = self.period;
        }
        self
    }

    /// `true` when the period is zero.
    pub fn is_disabled(&self) -> bool {
        self.period.is_zero()
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// What [`TickScheduler::wait_for_tick`] reports about the run it released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Monotonically increasing run number, starting at 1.
    pub tick: u64,
    /// `true` if the run was released more than a tenth of a period late.
    pub overrun: bool,
    /// Whole periods skipped because of the delay. Missed runs are not
    /// made up; the next one is scheduled a full period from release.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period scheduler for one background loop.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    /// When the next run should be released. `None` when disabled.
    next_tick: Option<Instant>,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    run_started: Option<Instant>,
    /// Duration of the most recent run, as reported by `record_tick_end`.
    last_run: Duration,
}

impl TickScheduler {
    /// Create a scheduler from config. The first run is due one period
    /// (plus jitter) from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let next_tick = if config.is_disabled() {
            debug!("periodic loop disabled");
            None
        } else {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max = config.initial_jitter.as_millis() as u64;
                Duration::from_millis(rand::rng().random_range(0..=max))
            };
            debug!(period = ?config.period, ?jitter, "periodic loop scheduled");
            Some(Instant::now() + config.period + jitter)
        };

        Self {
            config,
            tick_count: 0,
            next_tick,
            run_started: None,
            last_run: Duration::ZERO,
        }
    }

    /// Shorthand for `TickScheduler::new(TickConfig::every(period))`.
    pub fn every(period: Duration) -> Self {
        Self::new(TickConfig::every(period))
    }

    /// Wait until the next run is due.
    ///
    /// Pends forever when the loop is disabled.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let next = match self.next_tick {
            Some(next) => next,
            None => std::future::pending().await,
        };
        let period = self.config.period;

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.run_started = Some(now);

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > period / 10;
        let mut ticks_skipped = 0u64;
        if overrun {
            ticks_skipped =
                u64::try_from(late_by.as_nanos() / period.as_nanos()).unwrap_or(u64::MAX);
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late = ?late_by,
                    "periodic loop fell behind, skipping ahead"
                );
            }
        }
        self.next_tick = Some(now + period);

        trace!(tick = self.tick_count, overrun, "tick released");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the work for the current run has finished.
    ///
    /// Without this call no run duration is tracked and no budget
    /// warnings fire.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.run_started.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let period = self.config.period;

        self.last_run = elapsed;

        if period.is_zero() {
            return;
        }
        let utilization = elapsed.as_secs_f64() / period.as_secs_f64();
        if utilization >= 1.0 {
            warn!(
                tick = self.tick_count,
                elapsed = ?elapsed,
                period = ?period,
                "run took longer than its period"
            );
        } else if utilization >= BUDGET_WARN_FRACTION {
            warn!(
                tick = self.tick_count,
                elapsed = ?elapsed,
                period = ?period,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "run approaching its period"
            );
        }
    }

    /// Whether this loop is disabled (period zero).
    pub fn is_disabled(&self) -> bool {
        self.next_tick.is_none()
    }

    /// Number of runs released so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The validated period.
    pub fn period(&self) -> Duration {
        self.config.period
    }

    /// How long the most recent run took. Zero until a run has been
    /// recorded with [`Self::record_tick_end`].
    pub fn last_run(&self) -> Duration {
        self.last_run
    }
}
