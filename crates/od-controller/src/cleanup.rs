//! Captured-output eviction task
//!
//! A job's captured output is normally removed by its teardown. If the
//! controller never reaches teardown for a job, its buffer would stay in
//! the registry; this task drops buffers older than the retention period.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use od_core::CapturedOutputRegistry;

/// Interval between eviction passes
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Run the eviction task until cancelled
pub async fn run_capture_eviction(
    registry: Arc<CapturedOutputRegistry>,
    retention: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(EVICTION_INTERVAL);

    tracing::info!(
        "Starting capture eviction task (retention: {:?}, check interval: {:?})",
        retention,
        EVICTION_INTERVAL
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                evict_expired(&registry, retention);
            }
            _ = cancel.cancelled() => {
                tracing::info!("Capture eviction task shutting down");
                break;
            }
        }
    }
}

/// Drop buffers attached longer ago than `retention`
pub fn evict_expired(registry: &CapturedOutputRegistry, retention: Duration) -> usize {
    let evicted = registry.evict_older_than(retention);
    if evicted > 0 {
        tracing::warn!("Evicted captured output of {} jobs that never tore down", evicted);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use od_core::JobId;

    #[test]
    fn test_evict_expired() {
        let registry = CapturedOutputRegistry::new();
        registry.attach(&JobId::new("a", 1));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(evict_expired(&registry, Duration::from_secs(3600)), 0);
        assert_eq!(evict_expired(&registry, Duration::ZERO), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_task_stops_on_cancel() {
        let registry = Arc::new(CapturedOutputRegistry::new());
        registry.attach(&JobId::new("stale", 7));
        std::thread::sleep(Duration::from_millis(5));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_capture_eviction(
            Arc::clone(&registry),
            Duration::ZERO,
            cancel.clone(),
        ));

        // the first tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }
}
