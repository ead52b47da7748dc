use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{ReservationError, ReservationService};

pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the journal once it has grown by `threshold` appends.
/// Returns the number of events written, or `None` if not yet due.
pub async fn compact_if_due(service: &ReservationService, threshold: u64) -> Result<Option<usize>, ReservationError> {
    let appends = service.journal_appends_since_compact().await?;
    if appends < threshold {
        return Ok(None);
    }
    let written = service.compact_journal().await?;
    info!(appends, written, "journal compaction finished");
    Ok(Some(written))
}

/// Background task that keeps the journal from growing without bound.
pub async fn run_compactor(service: Arc<ReservationService>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&service, threshold).await {
            tracing::warn!(error = %e, "journal compaction failed, will retry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::engine::{ReservationRules, ReservationStore, RulePolicy};
    use crate::holiday::FixedHolidays;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;

    fn service(path: &std::path::Path) -> ReservationService {
        let rules = ReservationRules::new(
            Arc::new(SpotDirectory::default()),
            Arc::new(FixedHolidays::default()),
            RulePolicy::default(),
        );
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        ReservationService::new(
            rules,
            ReservationStore::open(path).unwrap(),
            Arc::new(FixedClock::new(today)),
            NotifyHub::disabled(),
        )
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let dir = std::env::temp_dir().join("parkgate_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("threshold.wal");
        let _ = std::fs::remove_file(&path);

        let svc = service(&path);
        let actor = Actor::new("ana.perez@example.com", "Ana Perez", Role::User);
        for hour in 8..11 {
            let start = format!("{hour:02}:00");
            let end = format!("{:02}:00", hour + 1);
            let created = svc
                .create_reservation(&ReservationRequest::new(1, "2026-10-20", start, end), &actor)
                .await
                .unwrap();
            if hour == 8 {
                svc.delete_reservation(&created.reservation.id.to_string(), &actor)
                    .await
                    .unwrap();
            }
        }

        assert_eq!(compact_if_due(&svc, 10).await.unwrap(), None);
        assert_eq!(compact_if_due(&svc, 4).await.unwrap(), Some(2));
        assert_eq!(svc.journal_appends_since_compact().await.unwrap(), 0);
        assert_eq!(compact_if_due(&svc, 4).await.unwrap(), None);
        let _ = std::fs::remove_file(&path);
    }
}
