use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{DECAY_TICK, DECAY_WINDOW};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Counts movement events and keeps an exponentially decayed events/second
/// rate, refreshed once per decay tick.
///
/// `mark` may be called from any thread. `tick` must only be driven by a
/// single ticker (normally [`decay_loop`]).
#[derive(Debug)]
pub struct ActivityMeter {
    total: AtomicU64,
    pending: AtomicU64,
    rate_bits: AtomicU64,
    primed: AtomicBool,
    tick_secs: f64,
    alpha: f64,
    tick_interval: Duration,
}

impl ActivityMeter {
    pub fn new() -> Self {
        Self::with_timing(DECAY_TICK, DECAY_WINDOW)
    }

    pub fn with_timing(tick_interval: Duration, window: Duration) -> Self {
        let tick_secs = tick_interval.as_secs_f64();
        let alpha = 1.0 - (-tick_secs / window.as_secs_f64()).exp();

        Self {
            total: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            rate_bits: AtomicU64::new(0.0_f64.to_bits()),
            primed: AtomicBool::new(false),
            tick_secs,
            alpha,
            tick_interval,
        }
    }

    pub fn mark(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Lifetime number of marks.
    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Latest decayed rate in events/second; 0.0 until the first tick.
    pub fn current_rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Folds the marks seen since the previous tick into the decayed rate.
    pub fn tick(&self) {
        let pending = self.pending.swap(0, Ordering::AcqRel);
        let instant_rate = pending as f64 / self.tick_secs;

        let rate = if self.primed.swap(true, Ordering::AcqRel) {
            let previous = self.current_rate();
            previous + self.alpha * (instant_rate - previous)
        } else {
            // First tick seeds the average so it doesn't crawl up from zero
            instant_rate
        };

        self.rate_bits.store(rate.max(0.0).to_bits(), Ordering::Release);
    }
}

impl Default for ActivityMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Ticks the meter on its own cadence until cancelled.
pub async fn decay_loop(meter: Arc<ActivityMeter>, cancel_token: CancellationToken) {
    let period = meter.tick_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                meter.tick();
                log_debug!("meter tick: rate={:.4} total={}", meter.current_rate(), meter.count());
            }
            _ = cancel_token.cancelled() => {
                log_info!("meter decay loop shutting down");
                break;
            }
        }
    }
}
