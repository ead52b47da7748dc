use std::time::Instant;

use crate::model::*;
use crate::observability::record_operation;

use super::calendar::build_grid;
use super::rules::parse_date;
use super::{ReservationError, ReservationService};

fn by_date_then_start(a: &ReservationRecord, b: &ReservationRecord) -> std::cmp::Ordering {
    (&a.date, &a.start_time, a.id).cmp(&(&b.date, &b.start_time, b.id))
}

impl ReservationService {
    /// Availability of every spot on `date`.
    pub async fn query_grid(&self, date: &str) -> Result<Grid, ReservationError> {
        let started = Instant::now();
        let result = match parse_date(date) {
            Ok(date) => {
                let store = self.gate.acquire().await;
                Ok(build_grid(date, self.spots(), store.on_date(date)))
            }
            Err(e) => Err(e),
        };
        record_operation("grid", &result, started);
        result
    }

    /// Admin: every stored reservation, ordered by date then start time.
    pub async fn list_reservations(&self, actor: &Actor) -> Result<Vec<ReservationRecord>, ReservationError> {
        let started = Instant::now();
        let result = if actor.is_admin() {
            let store = self.gate.acquire().await;
            let mut all: Vec<ReservationRecord> = store.iter().cloned().collect();
            store.release();
            all.sort_by(by_date_then_start);
            Ok(all)
        } else {
            Err(ReservationError::Unauthorized("admin only"))
        };
        record_operation("list", &result, started);
        result
    }

    /// The caller's reservations from today on, ordered by date then start time.
    pub async fn my_reservations(&self, actor: &Actor) -> Result<Vec<ReservationRecord>, ReservationError> {
        let started = Instant::now();
        let today = self.clock.today();
        let store = self.gate.acquire().await;
        let mut mine: Vec<ReservationRecord> = store
            .iter()
            .filter(|r| actor.holds(r))
            .filter(|r| r.parsed_date().is_some_and(|d| d >= today))
            .cloned()
            .collect();
        store.release();
        mine.sort_by(by_date_then_start);
        let result = Ok(mine);
        record_operation("mine", &result, started);
        result
    }

    /// Rewrite the journal from the live set. Returns the events written.
    pub async fn compact_journal(&self) -> Result<usize, ReservationError> {
        let mut store = self.gate.acquire().await;
        let written = store.compact().await?;
        tracing::info!(events = written, "reservation journal compacted");
        Ok(written)
    }

    pub async fn journal_appends_since_compact(&self) -> Result<u64, ReservationError> {
        let store = self.gate.acquire().await;
        store.appends_since_compact().await
    }

    /// Number of live reservations.
    pub async fn reservation_count(&self) -> usize {
        self.gate.acquire().await.len()
    }
}
