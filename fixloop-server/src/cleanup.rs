use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use crate::state::PrStateStore;

/// Periodically evict unmonitored PR state older than `retention`.
pub async fn cleanup_loop(store: Arc<PrStateStore>, every: Duration, retention: chrono::Duration) {
    let mut interval = interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing is stale at startup.
    interval.tick().await;

    info!(
        "State cleanup running every {:?}, retention {}h",
        every,
        retention.num_hours()
    );

    loop {
        interval.tick().await;
        store.cleanup(retention).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ManualClock, MonitorOptions, PrKey};
    use chrono::{TimeZone, Utc};

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_loop_evicts_stale_stopped_state() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(PrStateStore::with_clock(clock.clone()));
        let stopped = PrKey::new("acme", "widgets", 1);
        let live = PrKey::new("acme", "widgets", 2);
        let options = MonitorOptions {
            branch: "feature".to_string(),
            base_branch: "main".to_string(),
        };
        store.start_monitoring(&stopped, options.clone()).await;
        store.start_monitoring(&live, options).await;
        store.stop_monitoring(&stopped).await;
        clock.advance(chrono::Duration::hours(25));

        let task = tokio::spawn(cleanup_loop(
            store.clone(),
            Duration::from_secs(60),
            chrono::Duration::hours(24),
        ));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.get(&stopped).await.is_none());
        assert!(store.get(&live).await.is_some());
        task.abort();
    }
}
