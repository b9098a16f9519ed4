//! Integration tests for the periodic scheduler.
//!
//! Every async test runs on paused time, so `sleep_until` resolves as
//! soon as the runtime has nothing else to do and the clock can be moved
//! by hand with `tokio::time::advance`.

use std::time::Duration;

use echelon_tick::{TickConfig, TickScheduler};

// =========================================================================
// Helpers
// =========================================================================

/// Five-second loop with no jitter, the shape of the registry sweeps.
fn sweep_config() -> TickConfig {
    TickConfig {
        initial_jitter: Duration::ZERO,
        ..TickConfig::every(Duration::from_secs(5))
    }
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_is_disabled() {
    let cfg = TickConfig::default();
    assert!(cfg.is_disabled());
}

#[test]
fn test_validated_raises_tiny_period() {
    let cfg = TickConfig::every(Duration::from_micros(5)).validated();
    assert_eq!(cfg.period, TickConfig::MIN_PERIOD);
}

#[test]
fn test_validated_keeps_zero_period() {
    let cfg = TickConfig::every(Duration::ZERO).validated();
    assert!(cfg.is_disabled());
}

#[test]
fn test_validated_caps_jitter_at_one_period() {
    let cfg = TickConfig {
        period: Duration::from_secs(1),
        initial_jitter: Duration::from_secs(10),
    }
    .validated();

    assert_eq!(cfg.initial_jitter, Duration::from_secs(1));
}

// =========================================================================
// Scheduler creation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_scheduler_initial_state() {
    let s = TickScheduler::new(sweep_config());
    assert_eq!(s.tick_count(), 0);
    assert!(!s.is_disabled());
    assert_eq!(s.period(), Duration::from_secs(5));
    assert_eq!(s.last_run(), Duration::ZERO);
}

// =========================================================================
// Tick firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_after_one_period() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(sweep_config());

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert!(!info.overrun);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_increment_monotonically() {
    let mut s = TickScheduler::new(sweep_config());

    for expected in 1..=4 {
        let info = s.wait_for_tick().await;
        assert_eq!(info.tick, expected);
    }
    assert_eq!(s.tick_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_jitter_stays_within_bound() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(TickConfig {
        initial_jitter: Duration::from_millis(500),
        ..TickConfig::every(Duration::from_secs(5))
    });

    s.wait_for_tick().await;

    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(5));
    assert!(waited <= Duration::from_millis(5_500));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_never_fires() {
    let mut s = TickScheduler::every(Duration::ZERO);
    assert!(s.is_disabled());

    let result = tokio::time::timeout(Duration::from_secs(60), s.wait_for_tick()).await;
    assert!(result.is_err(), "disabled loop should pend forever");
}

// =========================================================================
// Overruns
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_overrun_skips_missed_periods() {
    let mut s = TickScheduler::new(sweep_config());
    s.wait_for_tick().await;

    // The "sweep" takes 12s: more than two periods.
    tokio::time::advance(Duration::from_secs(12)).await;
    s.record_tick_end();

    let info = s.wait_for_tick().await;
    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 1, "7s late on a 5s period skips one");
}

#[tokio::test(start_paused = true)]
async fn test_late_release_reschedules_a_full_period_later() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(sweep_config());
    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_secs(7)).await;

    let info = s.wait_for_tick().await;
    assert!(info.overrun);

    // Released at 12s, so the next run is due at 17s, off the 5s grid.
    s.wait_for_tick().await;
    assert_eq!(start.elapsed(), Duration::from_secs(17));
}

// =========================================================================
// Run duration tracking
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_tracks_run_duration() {
    let mut s = TickScheduler::new(sweep_config());

    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(300)).await;
    s.record_tick_end();

    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(100)).await;
    s.record_tick_end();

    assert_eq!(s.last_run(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_wait_is_noop() {
    let mut s = TickScheduler::new(sweep_config());

    s.record_tick_end();

    assert_eq!(s.last_run(), Duration::ZERO);
}

// =========================================================================
// select! loop pattern (mirrors the registry sweeps)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_stops_on_shutdown() {
    let mut s = TickScheduler::new(sweep_config());
    let (tx, mut rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(16)).await;
        tx.send(true).ok();
    });

    let mut runs = 0u64;
    loop {
        tokio::select! {
            _ = rx.changed() => break,
            info = s.wait_for_tick() => {
                runs += 1;
                s.record_tick_end();
                assert_eq!(info.tick, runs);
            }
        }
    }

    assert_eq!(runs, 3, "runs at 5s, 10s and 15s before shutdown at 16s");
}
