//! In-process counters and the periodic collector task.
//!
//! The collector logs a snapshot every interval and purges expired volatile
//! entries so the backing tables do not grow without bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::VolatileStore;

#[derive(Debug, Default)]
pub struct AuthMetrics {
    logins_succeeded: AtomicU64,
    logins_failed: AtomicU64,
    refreshes: AtomicU64,
    refresh_rejections: AtomicU64,
    authorization_denials: AtomicU64,
    rate_limited: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub logins_succeeded: u64,
    pub logins_failed: u64,
    pub refreshes: u64,
    pub refresh_rejections: u64,
    pub authorization_denials: u64,
    pub rate_limited: u64,
}

impl AuthMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login_succeeded(&self) {
        self.logins_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login_failed(&self) {
        self.logins_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refreshed(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_rejected(&self) {
        self.refresh_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn authorization_denied(&self) {
        self.authorization_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            logins_succeeded: self.logins_succeeded.load(Ordering::Relaxed),
            logins_failed: self.logins_failed.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_rejections: self.refresh_rejections.load(Ordering::Relaxed),
            authorization_denials: self.authorization_denials.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Spawn the collector. It stops when `shutdown` flips to `true` or its
/// sender is dropped.
pub fn spawn_metrics_collector(
    metrics: Arc<AuthMetrics>,
    volatile: Arc<dyn VolatileStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => collect(&metrics, volatile.as_ref()).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Metrics collector stopping");
                        break;
                    }
                }
            }
        }
    })
}

async fn collect(metrics: &AuthMetrics, volatile: &dyn VolatileStore) {
    let snapshot = metrics.snapshot();
    info!(
        logins_succeeded = snapshot.logins_succeeded,
        logins_failed = snapshot.logins_failed,
        refreshes = snapshot.refreshes,
        refresh_rejections = snapshot.refresh_rejections,
        authorization_denials = snapshot.authorization_denials,
        rate_limited = snapshot.rate_limited,
        "auth metrics"
    );
    match volatile.purge_expired().await {
        Ok(0) => {}
        Ok(purged) => debug!(purged, "Purged expired volatile entries"),
        Err(err) => warn!("Failed to purge expired volatile entries: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryVolatileStore;
    use chrono::Utc;

    #[test]
    fn counters_accumulate() {
        let metrics = AuthMetrics::new();
        metrics.login_succeeded();
        metrics.login_failed();
        metrics.login_failed();
        metrics.rate_limited();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.logins_succeeded, 1);
        assert_eq!(snapshot.logins_failed, 2);
        assert_eq!(snapshot.rate_limited, 1);
        assert_eq!(snapshot.refreshes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collector_purges_and_stops_on_shutdown() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let volatile = Arc::new(MemoryVolatileStore::new(clock.clone()));
        volatile
            .set("stale", "x", Some(Duration::from_secs(1)))
            .await?;
        clock.advance(chrono::Duration::seconds(5));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_metrics_collector(
            Arc::new(AuthMetrics::new()),
            volatile.clone(),
            Duration::from_secs(10),
            rx,
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(volatile.purge_expired().await?, 0);

        tx.send(true)?;
        handle.await?;
        Ok(())
    }
}
