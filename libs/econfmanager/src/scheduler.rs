//! Poll scheduler
//!
//! Background tokio task that samples every polled parameter from the
//! attached [`DataSource`] once per interval and applies the differences
//! through the registry, which persists and notifies.
//!
//! State machine: `Stopped -> Running -> Stopped`. `stop` waits for the
//! in-flight tick, so no sample is applied after it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ParameterId};
use crate::error::{EconfError, Result};
use crate::registry::Registry;
use crate::source::DataSource;

/// Sample bound used by `poll_once` when the scheduler has never run
pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Counters for monitoring the poll loop
#[derive(Debug, Default)]
pub struct PollStats {
    /// Completed ticks, including manual polls
    pub ticks: AtomicU64,
    /// Values that differed from the registry and were applied
    pub changes: AtomicU64,
    /// Samples that failed, timed out or had the wrong type
    pub sample_failures: AtomicU64,
}

impl PollStats {
    pub fn snapshot(&self) -> PollStatsSnapshot {
        PollStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
            sample_failures: self.sample_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStatsSnapshot {
    pub ticks: u64,
    pub changes: u64,
    pub sample_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Running,
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
    interval: Duration,
}

pub struct PollScheduler {
    registry: Arc<Registry>,
    source: Arc<dyn DataSource>,
    stats: Arc<PollStats>,
    running: Mutex<Option<Running>>,
    last_interval: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("source", &self.source.name())
            .field("state", &self.state())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl PollScheduler {
    pub fn new(registry: Arc<Registry>, source: Arc<dyn DataSource>) -> Self {
        Self {
            registry,
            source,
            stats: Arc::new(PollStats::default()),
            running: Mutex::new(None),
            last_interval: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollState {
        match &*self.running.lock() {
            Some(running) if !running.handle.is_finished() => PollState::Running,
            _ => PollState::Stopped,
        }
    }

    /// Interval of the current run, if running
    pub fn interval(&self) -> Option<Duration> {
        self.running.lock().as_ref().map(|r| r.interval)
    }

    pub fn stats(&self) -> PollStatsSnapshot {
        self.stats.snapshot()
    }

    /// Start polling every `interval`; the first tick runs immediately
    pub fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(EconfError::InvalidInterval(0));
        }

        let mut slot = self.running.lock();
        if matches!(&*slot, Some(running) if !running.handle.is_finished()) {
            return Err(EconfError::AlreadyRunning);
        }

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.source),
            Arc::clone(&self.stats),
            Arc::clone(&shutdown),
            interval,
        ));

        *slot = Some(Running {
            handle,
            shutdown,
            interval,
        });
        *self.last_interval.lock() = Some(interval);
        info!(
            "Poll scheduler started: {} every {}ms",
            self.source.name(),
            interval.as_millis()
        );
        Ok(())
    }

    /// Stop polling and wait for the in-flight tick; no-op when stopped
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.shutdown.notify_one();
        if let Err(e) = running.handle.await {
            warn!("Poll task ended abnormally: {}", e);
        }
        info!("Poll scheduler stopped");
    }

    /// Run one tick now, returning the ids whose value changed
    pub async fn poll_once(&self) -> Vec<ParameterId> {
        let bound = self.last_interval.lock().unwrap_or(DEFAULT_SAMPLE_TIMEOUT);
        poll_tick(&self.registry, self.source.as_ref(), &self.stats, bound).await
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        // Cannot await here; the task exits at its next select
        if let Some(running) = self.running.lock().take() {
            running.shutdown.notify_one();
        }
    }
}

async fn poll_loop(
    registry: Arc<Registry>,
    source: Arc<dyn DataSource>,
    stats: Arc<PollStats>,
    shutdown: Arc<Notify>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;  // Check shutdown first

            _ = shutdown.notified() => {
                debug!("Poll loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                poll_tick(&registry, source.as_ref(), &stats, interval).await;
            }
        }
    }
}

/// Sample every polled parameter once, each sample bounded by `bound`
async fn poll_tick(
    registry: &Registry,
    source: &dyn DataSource,
    stats: &PollStats,
    bound: Duration,
) -> Vec<ParameterId> {
    let mut changed = Vec::new();

    for descriptor in Catalog::global().polled() {
        let id = descriptor.id;
        let sampled = match tokio::time::timeout(bound, source.sample(id)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                stats.sample_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Sample {} from {} failed: {:#}", id, source.name(), e);
                continue;
            },
            Err(_) => {
                stats.sample_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Sample {} from {} timed out after {}ms",
                    id,
                    source.name(),
                    bound.as_millis()
                );
                continue;
            },
        };

        match registry.apply_sampled(id, sampled).await {
            Ok(true) => {
                stats.changes.fetch_add(1, Ordering::Relaxed);
                changed.push(id);
            },
            Ok(false) => {},
            Err(e) => {
                stats.sample_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Sample {} rejected: {}", id, e);
            },
        }
    }

    stats.ticks.fetch_add(1, Ordering::Relaxed);
    if !changed.is_empty() {
        debug!("Poll tick applied {} changes", changed.len());
    }
    changed
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::registry::DEFAULT_PERSIST_TIMEOUT;
    use crate::source::MemorySource;
    use crate::store::Store;
    use crate::time::SystemTimeProvider;
    use crate::value::ParameterValue;
    use tracing_test::traced_test;

    async fn fixture(dir: &tempfile::TempDir) -> (Arc<Registry>, Arc<MemorySource>, PollScheduler) {
        let store = Store::open(dir.path().join("p.db"), dir.path().join("s.db"), None)
            .await
            .unwrap();
        let registry = Arc::new(Registry::new(
            Arc::new(store),
            Arc::new(Dispatcher::new()),
            Arc::new(SystemTimeProvider),
            DEFAULT_PERSIST_TIMEOUT,
        ));
        let source = Arc::new(MemorySource::new());
        for d in Catalog::global().polled() {
            source.set(d.id, registry.current(d.id));
        }
        let scheduler = PollScheduler::new(Arc::clone(&registry), source.clone());
        (registry, source, scheduler)
    }

    #[tokio::test]
    async fn test_start_validation_and_double_start() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, scheduler) = fixture(&dir).await;

        assert!(matches!(
            scheduler.start(Duration::ZERO),
            Err(EconfError::InvalidInterval(0))
        ));
        scheduler.start(Duration::from_millis(50)).unwrap();
        assert_eq!(scheduler.state(), PollState::Running);
        assert!(matches!(
            scheduler.start(Duration::from_millis(50)),
            Err(EconfError::AlreadyRunning)
        ));

        scheduler.stop().await;
        assert_eq!(scheduler.state(), PollState::Stopped);
        scheduler.stop().await;

        scheduler.start(Duration::from_millis(50)).unwrap();
        assert_eq!(scheduler.state(), PollState::Running);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_poll_once_applies_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, source, scheduler) = fixture(&dir).await;

        assert!(scheduler.poll_once().await.is_empty());

        source.set(ParameterId::DeviceUptimeSeconds, 120_u64);
        source.set(ParameterId::ImageAcquisitionImageHeight, 720_i32);
        let changed = scheduler.poll_once().await;
        assert_eq!(
            changed,
            vec![
                ParameterId::DeviceUptimeSeconds,
                ParameterId::ImageAcquisitionImageHeight
            ]
        );
        assert_eq!(
            registry.get(ParameterId::ImageAcquisitionImageHeight).unwrap(),
            ParameterValue::I32(720)
        );
        let stats = scheduler.stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.changes, 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_and_mistyped_samples_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, source, scheduler) = fixture(&dir).await;

        source.set(ParameterId::ImageAcquisitionImageWidth, 640_i32);
        source.fail_next(ParameterId::ImageAcquisitionImageWidth, 1);
        source.set(ParameterId::DeviceTemperature, ParameterValue::String("hot".into()));

        assert!(scheduler.poll_once().await.is_empty());
        assert_eq!(
            registry.get(ParameterId::ImageAcquisitionImageWidth).unwrap(),
            ParameterValue::I32(1920)
        );
        assert_eq!(scheduler.stats().sample_failures, 2);
        assert!(logs_contain("injected failure"));

        // Retried on the next tick
        assert_eq!(
            scheduler.poll_once().await,
            vec![ParameterId::ImageAcquisitionImageWidth]
        );
    }

    #[tokio::test]
    async fn test_slow_sample_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, source, scheduler) = fixture(&dir).await;

        source.set(ParameterId::DeviceUptimeSeconds, 99_u64);
        source.delay(ParameterId::DeviceUptimeSeconds, Duration::from_millis(300));

        scheduler.start(Duration::from_millis(50)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;

        assert_eq!(
            registry.get(ParameterId::DeviceUptimeSeconds).unwrap(),
            ParameterValue::U64(0)
        );
        assert!(scheduler.stats().sample_failures >= 1);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_tick() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, source, scheduler) = fixture(&dir).await;
        let height = ParameterId::ImageAcquisitionImageHeight;

        // Uptime is sampled before height, so height lands only if the tick finishes
        source.set(ParameterId::DeviceUptimeSeconds, 7_u64);
        source.delay(ParameterId::DeviceUptimeSeconds, Duration::from_millis(150));
        source.set(height, 480_i32);

        scheduler.start(Duration::from_secs(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.stats().ticks, 0);
        scheduler.stop().await;

        assert_eq!(scheduler.stats().ticks, 1);
        assert_eq!(
            registry.get(ParameterId::DeviceUptimeSeconds).unwrap(),
            ParameterValue::U64(7)
        );
        assert_eq!(registry.get(height).unwrap(), ParameterValue::I32(480));

        let samples = source.sample_count();
        source.set(height, 600_i32);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.sample_count(), samples);
        assert_eq!(registry.get(height).unwrap(), ParameterValue::I32(480));
    }
}
