use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::Actor;

/// Move every PENDING booking older than `response_timeout` to TIMEOUT.
/// Returns how many were timed out.
pub async fn sweep_stale_bookings(engine: &Engine, response_timeout: chrono::Duration) -> usize {
    let cutoff = engine.now() - response_timeout;
    let system = Actor::system();
    let mut timed_out = 0;
    for id in engine.collect_stale_pending(cutoff) {
        match engine.time_out_booking(&system, id).await {
            Ok(_) => {
                timed_out += 1;
                info!("timed out unanswered booking {id}");
            }
            Err(e) => {
                // Answered between collect and transition.
                tracing::debug!("reaper skip {id}: {e}");
            }
        }
    }
    if timed_out > 0 {
        metrics::counter!(crate::observability::BOOKINGS_TIMED_OUT_TOTAL).increment(timed_out as u64);
    }
    timed_out
}

/// Background task that expires unanswered requests and drops idle
/// notification channels.
pub async fn run_reaper(engine: Arc<Engine>, response_timeout: chrono::Duration, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_stale_bookings(&engine, response_timeout).await;
        engine.notify.prune();
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            if let Err(e) = engine.compact_wal().await {
                tracing::error!("WAL compaction failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::clock::ManualClock;
    use crate::engine::NewBooking;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_times_out_only_stale_pending() {
        let provider = Ulid::new();
        let offering = Ulid::new();
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert_offering(ServiceOffering {
            id: offering,
            provider_id: provider,
            duration_minutes: 60,
            price: 1000,
            active: true,
        });
        let day = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let clock = Arc::new(ManualClock::new(day.and_hms_opt(8, 0, 0).unwrap()));
        let engine = Engine::new(
            test_wal_path("reaper_sweep.wal"),
            Arc::new(NotifyHub::new()),
            clock.clone(),
            catalog,
        )
        .unwrap();

        let client = Actor::client(Ulid::new());
        let mut ids = Vec::new();
        for h in [12, 13] {
            let b = engine
                .create_booking(
                    &client,
                    NewBooking {
                        id: Ulid::new(),
                        provider_id: provider,
                        offering_id: offering,
                        requested_at: day.and_hms_opt(h, 0, 0).unwrap(),
                        design_id: None,
                        notes: None,
                    },
                )
                .await
                .unwrap();
            ids.push(b.id);
        }
        engine.confirm_booking(&Actor::provider(provider), ids[1]).await.unwrap();

        let timeout = chrono::Duration::hours(2);
        assert_eq!(sweep_stale_bookings(&engine, timeout).await, 0);

        clock.advance(timeout);
        assert_eq!(sweep_stale_bookings(&engine, timeout).await, 1);
        let stale = engine.get_booking(&client, ids[0]).await.unwrap();
        assert_eq!(stale.status, BookingStatus::TimedOut);
        let answered = engine.get_booking(&client, ids[1]).await.unwrap();
        assert_eq!(answered.status, BookingStatus::Confirmed);

        // Nothing left to do on the next pass.
        assert_eq!(sweep_stale_bookings(&engine, timeout).await, 0);
    }
}
