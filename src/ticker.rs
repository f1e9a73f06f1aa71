// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Non-overlapping recurring ticks.
//!
//! Logical sync and physical monitoring both run a unit of work on a fixed
//! period. A tick that comes due while the previous one is still running is
//! skipped, never queued, so a slow target can't build up a backlog of
//! concurrent batches.
//!
//! ```text
//! timer ──tick──► TickGuard::try_enter ──Some(permit)──► spawn(work)  (permit dropped on completion)
//!                        │
//!                        └──None──► skip + replication_ticks_skipped_total
//! ```
//!
//! Teardown stops the timer immediately and then waits, bounded by the drain
//! timeout, for an in-flight tick to finish. In-flight work is never aborted.

use crate::telemetry;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument, Span};

/// Shortest period a ticker runs at. `interval_at` rejects a zero period.
const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// In-progress flag for one recurring task.
#[derive(Debug, Clone, Default)]
pub struct TickGuard {
    running: Arc<AtomicBool>,
}

impl TickGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard. `None` while another permit is alive.
    pub fn try_enter(&self) -> Option<TickPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickPermit {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases its [`TickGuard`] on drop.
#[derive(Debug)]
pub struct TickPermit {
    running: Arc<AtomicBool>,
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Running recurring task. Dropping it without [`teardown`](Self::teardown)
/// still stops the timer (the shutdown sender closes).
pub struct TickerHandle {
    task: &'static str,
    shutdown_tx: watch::Sender<bool>,
    timer: JoinHandle<()>,
    in_flight: Arc<Mutex<Option<JoinHandle<()>>>>,
    guard: TickGuard,
    drain_timeout: Duration,
}

impl TickerHandle {
    /// Whether a tick is executing right now.
    pub fn tick_in_progress(&self) -> bool {
        self.guard.is_running()
    }

    /// Stop scheduling ticks and let an in-flight tick finish.
    pub async fn teardown(self) {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.timer.await {
            if e.is_panic() {
                warn!(task = self.task, error = %e, "Ticker timer task panicked");
            }
        }

        let in_flight = self.in_flight.lock().await.take();
        let Some(tick) = in_flight else {
            return;
        };
        if tick.is_finished() {
            return;
        }

        debug!(task = self.task, "Waiting for in-flight tick to finish");
        match tokio::time::timeout(self.drain_timeout, tick).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = self.task, error = %e, "In-flight tick failed during teardown"),
            Err(_) => warn!(
                task = self.task,
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "In-flight tick still running after drain timeout, detaching"
            ),
        }
    }
}

/// Spawn a timer that runs `tick` every `period`, skipping ticks that come
/// due while the previous one is still running.
///
/// The first tick fires one full period after spawn. A zero period is
/// raised to 1ms.
pub fn spawn_ticker<F, Fut>(
    task: &'static str,
    period: Duration,
    drain_timeout: Duration,
    span: Span,
    mut tick: F,
) -> TickerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = if period.is_zero() {
        warn!(task, "Zero tick period, clamping to {:?}", MIN_TICK_PERIOD);
        MIN_TICK_PERIOD
    } else {
        period
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let guard = TickGuard::new();
    let in_flight: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));

    let timer_guard = guard.clone();
    let timer_in_flight = Arc::clone(&in_flight);
    let tick_span = span.clone();

    let timer = tokio::spawn(
        async move {
            let _ = shutdown_rx.borrow_and_update();

            info!(task, period_ms = period.as_millis() as u64, "Starting recurring task");

            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            info!(task, "Shutdown signal received, stopping recurring task");
                            break;
                        }
                        continue;
                    }

                    _ = timer.tick() => {}
                }

                let Some(permit) = timer_guard.try_enter() else {
                    debug!(task, "Previous tick still running, skipping");
                    telemetry::record_tick_skipped(task);
                    continue;
                };

                let work = tick();
                let handle = tokio::spawn(
                    async move {
                        let _permit = permit;
                        let started = Instant::now();
                        work.await;
                        telemetry::record_tick_complete(task, started.elapsed());
                    }
                    .instrument(tick_span.clone()),
                );
                *timer_in_flight.lock().await = Some(handle);
            }
        }
        .instrument(span),
    );

    TickerHandle {
        task,
        shutdown_tx,
        timer,
        in_flight,
        guard,
        drain_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_guard_is_exclusive() {
        let guard = TickGuard::new();
        let permit = guard.try_enter().unwrap();
        assert!(guard.is_running());
        assert!(guard.try_enter().is_none());

        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_enter().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = spawn_ticker(
            "test",
            Duration::from_millis(100),
            Duration::from_secs(1),
            Span::none(),
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "first tick is one period out");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);

        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = spawn_ticker("test", Duration::ZERO, Duration::from_secs(1), Span::none(), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.timer.is_finished(), "timer task must still be running");
        assert!(count.load(Ordering::SeqCst) >= 5);

        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_is_skipped_not_queued() {
        let started = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let (s, c, m) = (Arc::clone(&started), Arc::clone(&concurrent), Arc::clone(&max_concurrent));
        let handle = spawn_ticker(
            "test",
            Duration::from_millis(100),
            Duration::from_secs(1),
            Span::none(),
            move || {
                let (s, c, m) = (Arc::clone(&s), Arc::clone(&c), Arc::clone(&m));
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(350)).await;
                    c.fetch_sub(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(1000)).await;
        handle.teardown().await;

        let ticks = started.load(Ordering::SeqCst);
        assert!(ticks >= 2 && ticks < 10, "expected skipped ticks, got {}", ticks);
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = spawn_ticker(
            "test",
            Duration::from_millis(100),
            Duration::from_secs(1),
            Span::none(),
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.teardown().await;
        let after_teardown = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_teardown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_waits_for_in_flight_tick() {
        let finished = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&finished);
        let handle = spawn_ticker(
            "test",
            Duration::from_millis(100),
            Duration::from_secs(5),
            Span::none(),
            move || {
                let f = Arc::clone(&f);
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    f.store(true, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.tick_in_progress());
        handle.teardown().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
