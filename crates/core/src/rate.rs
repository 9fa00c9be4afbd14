//! Moving-window throughput estimate for streamed chunks.
//!
//! [`RateWindow`] holds the samples and does the arithmetic. [`RateEstimator`]
//! wraps it with a periodic recompute task and publishes the result on a
//! `watch` channel. The task starts on the first recorded chunk and stops by
//! itself once the window runs dry, so an idle estimator costs nothing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1000);

const MIN_SPAN: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateConfig {
    pub update_interval: Duration,
    pub window: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RateSample {
    timestamp: Instant,
    count: usize,
}

/// Time-ordered samples trimmed to a trailing window.
#[derive(Debug)]
pub struct RateWindow {
    samples: VecDeque<RateSample>,
    window: Duration,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Samples must arrive in time order.
    pub fn record(&mut self, timestamp: Instant, count: usize) {
        self.samples.push_back(RateSample { timestamp, count });
    }

    pub fn prune(&mut self, now: Instant) {
        let Some(start) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(front) = self.samples.front() {
            if front.timestamp >= start {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Tokens per second over the samples still inside the window, rounded to
    /// one decimal. `None` once the window is empty.
    pub fn rate_at(&mut self, now: Instant) -> Option<f64> {
        self.prune(now);
        let oldest = self.samples.front()?.timestamp;
        let tokens: usize = self.samples.iter().map(|s| s.count).sum();
        let span = now.saturating_duration_since(oldest).max(MIN_SPAN);
        Some(round1(tokens as f64 / span.as_secs_f64()))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

struct Inner {
    window: RateWindow,
    started_at: Option<Instant>,
    ticker: Option<JoinHandle<()>>,
    // Bumped whenever a ticker is started or cancelled; a task with a stale
    // epoch exits without publishing.
    epoch: u64,
    tx: watch::Sender<f64>,
}

impl Inner {
    /// Returns whether the ticker should keep running.
    fn recompute(&mut self, now: Instant) -> bool {
        match self.window.rate_at(now) {
            Some(rate) => {
                self.tx.send_replace(rate);
                true
            }
            None => {
                self.tx.send_replace(0.0);
                self.ticker = None;
                self.started_at = None;
                debug!(target: "core::rate", "window empty, ticker idle");
                false
            }
        }
    }

    fn cancel_ticker(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

/// Live tokens-per-second estimate fed by [`record_chunk`](Self::record_chunk).
///
/// Owns its recompute task: started on demand, stopped when the window empties,
/// on [`reset_calculator`](Self::reset_calculator) and on drop. Use one
/// estimator per concurrent conversation.
pub struct RateEstimator {
    inner: Arc<Mutex<Inner>>,
    rx: watch::Receiver<f64>,
    config: RateConfig,
}

impl RateEstimator {
    pub fn new(config: RateConfig) -> Self {
        let (tx, rx) = watch::channel(0.0);
        let inner = Inner {
            window: RateWindow::new(config.window),
            started_at: None,
            ticker: None,
            epoch: 0,
            tx,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            rx,
            config,
        }
    }

    /// Must be called from within a tokio runtime for the ticker to start.
    pub fn record_chunk(&self, timestamp: Instant, count: usize) {
        let mut inner = lock(&self.inner);
        inner.window.record(timestamp, count);
        if inner.started_at.is_none() {
            inner.started_at = Some(timestamp);
        }
        if inner.ticker.is_none() {
            self.start_ticker(&mut inner);
        }
    }

    pub fn reset_calculator(&self) {
        let mut inner = lock(&self.inner);
        inner.cancel_ticker();
        inner.window.clear();
        inner.started_at = None;
        inner.tx.send_replace(0.0);
    }

    /// Recomputes against the current instant and publishes the result, without
    /// waiting for the next tick. Goes idle if the window has emptied.
    pub fn refresh(&self) -> f64 {
        let mut inner = lock(&self.inner);
        match inner.window.rate_at(Instant::now()) {
            Some(rate) => {
                inner.tx.send_replace(rate);
                rate
            }
            None => {
                inner.cancel_ticker();
                inner.started_at = None;
                inner.tx.send_replace(0.0);
                0.0
            }
        }
    }

    /// Last published rate.
    pub fn rate(&self) -> f64 {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.rx.clone()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner).ticker.is_some()
    }

    /// Timestamp of the first chunk since the estimator last went idle.
    pub fn started_at(&self) -> Option<Instant> {
        lock(&self.inner).started_at
    }

    fn start_ticker(&self, inner: &mut Inner) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(target: "core::rate", "no tokio runtime; rate will not update");
            return;
        };
        inner.epoch = inner.epoch.wrapping_add(1);
        let epoch = inner.epoch;
        let weak = Arc::downgrade(&self.inner);
        let period = self.config.update_interval;
        inner.ticker = Some(rt.spawn(run_ticker(weak, epoch, period)));
        debug!(target: "core::rate", "ticker started epoch={}", epoch);
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(RateConfig::default())
    }
}

impl Drop for RateEstimator {
    fn drop(&mut self) {
        lock(&self.inner).cancel_ticker();
    }
}

async fn run_ticker(inner: Weak<Mutex<Inner>>, epoch: u64, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut guard = lock(&inner);
        if guard.epoch != epoch || !guard.recompute(Instant::now()) {
            return;
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn window_rate_over_span() {
        let t0 = Instant::now();
        let mut w = RateWindow::new(DEFAULT_WINDOW);
        w.record(t0, 10);
        w.record(t0 + 200 * MS, 10);
        assert_eq!(w.rate_at(t0 + 200 * MS), Some(100.0));
    }

    #[test]
    fn window_empty_is_none() {
        let mut w = RateWindow::new(DEFAULT_WINDOW);
        assert_eq!(w.rate_at(Instant::now()), None);
    }

    #[test]
    fn span_is_floored_to_one_millisecond() {
        let t0 = Instant::now();
        let mut w = RateWindow::new(DEFAULT_WINDOW);
        w.record(t0, 3);
        assert_eq!(w.rate_at(t0), Some(3000.0));
    }

    #[test]
    fn prune_drops_samples_older_than_window() {
        let t0 = Instant::now();
        let mut w = RateWindow::new(DEFAULT_WINDOW);
        w.record(t0, 5);
        w.record(t0 + 600 * MS, 7);
        w.prune(t0 + 1000 * MS);
        assert_eq!(w.len(), 2);
        w.prune(t0 + 1001 * MS);
        assert_eq!(w.len(), 1);
        // 7 tokens over 900ms
        assert_eq!(w.rate_at(t0 + 1500 * MS), Some(7.8));
        assert_eq!(w.rate_at(t0 + 1601 * MS), None);
        assert!(w.is_empty());
    }

    #[test]
    fn rounds_to_one_decimal() {
        let t0 = Instant::now();
        let mut w = RateWindow::new(DEFAULT_WINDOW);
        w.record(t0, 1);
        assert_eq!(w.rate_at(t0 + 300 * MS), Some(3.3));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_estimator_publishes_zero() {
        let est = RateEstimator::default();
        assert_eq!(est.rate(), 0.0);
        assert!(!est.is_active());
        assert!(est.started_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_publish_then_go_idle() {
        let est = RateEstimator::default();
        let t0 = Instant::now();
        est.record_chunk(t0, 10);
        est.record_chunk(t0, 10);
        assert!(est.is_active());
        assert_eq!(est.started_at(), Some(t0));

        tokio::time::sleep(510 * MS).await;
        tokio::task::yield_now().await;
        // 20 tokens over 500ms
        assert_eq!(est.rate(), 40.0);

        tokio::time::sleep(500 * MS).await;
        tokio::task::yield_now().await;
        assert_eq!(est.rate(), 20.0);
        assert!(est.is_active());

        tokio::time::sleep(500 * MS).await;
        tokio::task::yield_now().await;
        assert_eq!(est.rate(), 0.0);
        assert!(!est.is_active());
        assert!(est.started_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_reports_a_burst_shorter_than_one_tick() {
        let est = RateEstimator::default();
        est.record_chunk(Instant::now(), 6);
        tokio::time::sleep(200 * MS).await;
        assert_eq!(est.rate(), 0.0);
        // 6 tokens over 200ms
        assert_eq!(est.refresh(), 30.0);
        assert_eq!(est.rate(), 30.0);
        assert!(est.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_on_empty_window_goes_idle() {
        let est = RateEstimator::default();
        est.record_chunk(Instant::now(), 6);
        tokio::time::sleep(300 * MS).await;
        est.reset_calculator();
        assert_eq!(est.refresh(), 0.0);
        assert!(!est.is_active());
        assert!(est.started_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn record_restarts_an_idle_ticker() {
        let est = RateEstimator::default();
        est.record_chunk(Instant::now(), 4);
        tokio::time::sleep(2000 * MS).await;
        tokio::task::yield_now().await;
        assert!(!est.is_active());

        est.record_chunk(Instant::now(), 5);
        assert!(est.is_active());
        tokio::time::sleep(510 * MS).await;
        tokio::task::yield_now().await;
        assert_eq!(est.rate(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_zeroes_and_stops_ticking() {
        let est = RateEstimator::default();
        let mut rx = est.subscribe();
        est.record_chunk(Instant::now(), 50);
        tokio::time::sleep(510 * MS).await;
        tokio::task::yield_now().await;
        assert!(est.rate() > 0.0);

        est.reset_calculator();
        assert_eq!(est.rate(), 0.0);
        assert!(!est.is_active());
        rx.borrow_and_update();

        tokio::time::sleep(3000 * MS).await;
        tokio::task::yield_now().await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(est.rate(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_is_safe_when_idle() {
        let est = RateEstimator::default();
        est.reset_calculator();
        est.reset_calculator();
        assert_eq!(est.rate(), 0.0);
        assert!(!est.is_active());
    }

    #[test]
    fn record_without_runtime_does_not_panic() {
        let est = RateEstimator::default();
        est.record_chunk(Instant::now(), 1);
        assert!(!est.is_active());
        assert_eq!(est.rate(), 0.0);
    }
}
