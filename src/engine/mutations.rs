use std::collections::BTreeSet;
use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::notify::Notice;
use crate::observability::record_operation;

use super::calendar::build_grid;
use super::conflict::{find_conflict, reservations_for};
use super::rules::is_weekend;
use super::{Cancelled, Created, Purged, ReservationError, ReservationService, ReservationStore, ValidationCode};

impl ReservationService {
    /// Validate, check for overlap, persist, and return the refreshed grid.
    pub async fn create_reservation(
        &self,
        request: &ReservationRequest,
        actor: &Actor,
    ) -> Result<Created, ReservationError> {
        let started = Instant::now();
        let result = self.create_inner(request, actor).await;
        record_operation("create", &result, started);
        result
    }

    async fn create_inner(&self, request: &ReservationRequest, actor: &Actor) -> Result<Created, ReservationError> {
        let now = self.clock.now();
        let valid = self
            .rules
            .validate(request, actor, now)
            .await
            .inspect_err(|e| {
                tracing::debug!(spot = request.spot_id, date = %request.date, code = e.code(), "reservation rejected by rules");
            })?;

        let mut store = self.gate.acquire().await;

        let existing = reservations_for(store.on_date(valid.date), self.spots(), valid.spot.id);
        if let Some(hit) = find_conflict(&valid.window, &existing) {
            tracing::info!(
                spot = valid.spot.id,
                date = %valid.date,
                window = %format_args!("{}-{}", valid.window.start, valid.window.end),
                existing = %hit.id,
                "reservation conflicts"
            );
            return Err(ReservationError::Conflict(hit.id));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            spot_id: valid.spot.id,
            date: valid.date,
            window: valid.window,
            holder_identity: actor.identity.clone(),
            holder_name: Some(actor.name.trim().to_string()),
        };
        let record = reservation.to_record();
        store.insert(record.clone()).await?;
        let grid = build_grid(valid.date, self.spots(), store.on_date(valid.date));
        store.release();

        tracing::info!(
            id = %record.id,
            spot = record.spot_id,
            date = %record.date,
            start = %record.start_time,
            end = %record.end_time,
            holder = %record.holder_identity,
            "reservation created"
        );

        self.notify.publish(Notice::Confirmed {
            reservation: record.clone(),
            spot_name: valid.spot.name.clone(),
        });
        if is_weekend(valid.date)
            && let Some(coordinator) = &self.coordination_email
        {
            self.notify.publish(Notice::WeekendBooking {
                coordinator: coordinator.clone(),
                reservation: record.clone(),
                spot_name: valid.spot.name.clone(),
            });
        }

        Ok(Created {
            reservation: record,
            grid,
            grid_date: format_date(valid.date),
        })
    }

    /// Cancel a reservation held by the caller, or any reservation for an admin.
    pub async fn delete_reservation(&self, reservation_id: &str, actor: &Actor) -> Result<Cancelled, ReservationError> {
        let started = Instant::now();
        let result = self.delete_inner(reservation_id, actor).await;
        record_operation("delete", &result, started);
        result
    }

    async fn delete_inner(&self, reservation_id: &str, actor: &Actor) -> Result<Cancelled, ReservationError> {
        let not_found = || ReservationError::ReservationNotFound(reservation_id.to_string());
        let id = Ulid::from_string(reservation_id.trim()).map_err(|_| not_found())?;

        let mut store = self.gate.acquire().await;

        let record = store.get(&id).cloned().ok_or_else(not_found)?;
        if !actor.is_admin() && !actor.holds(&record) {
            tracing::warn!(%id, caller = %actor.identity, "cancellation refused");
            return Err(ReservationError::Unauthorized(
                "only the holder or an admin may cancel a reservation",
            ));
        }
        store.remove(id).await?;

        let (grid_date, degraded) = match record.parsed_date() {
            Some(date) => (date, false),
            None => {
                tracing::warn!(%id, date = %record.date, "cancelled reservation had an unparsable date");
                (self.clock.today(), true)
            }
        };
        let grid = build_grid(grid_date, self.spots(), store.on_date(grid_date));
        store.release();

        tracing::info!(%id, spot = record.spot_id, date = %record.date, by = %actor.identity, "reservation cancelled");
        self.notify.publish(Notice::Cancelled {
            spot_name: self.spot_name(record.spot_id),
            reservation: record,
            cancelled_by: actor.name.clone(),
        });

        Ok(Cancelled {
            grid,
            grid_date: format_date(grid_date),
            degraded,
        })
    }

    /// Admin: remove every reservation.
    pub async fn purge_all(&self, actor: &Actor) -> Result<Purged, ReservationError> {
        let started = Instant::now();
        let result = self.purge_where(actor, |_| true).await;
        record_operation("purge_all", &result, started);
        result
    }

    /// Admin: remove every reservation held by `holder_identity`.
    pub async fn purge_user(&self, actor: &Actor, holder_identity: &str) -> Result<Purged, ReservationError> {
        let started = Instant::now();
        let result = if holder_identity.trim().is_empty() {
            Err(ReservationError::validation(
                ValidationCode::InvalidIdentity,
                "holder identity is required",
            ))
        } else {
            let holder = holder_identity.trim();
            self.purge_where(actor, |r| r.is_held_by(holder)).await
        };
        record_operation("purge_user", &result, started);
        result
    }

    async fn purge_where<F>(&self, actor: &Actor, keep_out: F) -> Result<Purged, ReservationError>
    where
        F: Fn(&ReservationRecord) -> bool,
    {
        if !actor.is_admin() {
            tracing::warn!(caller = %actor.identity, "purge refused");
            return Err(ReservationError::Unauthorized("admin only"));
        }

        let mut store = self.gate.acquire().await;
        let ids: Vec<ReservationId> = store.iter().filter(|r| keep_out(r)).map(|r| r.id).collect();
        let removed = store.remove_many(&ids).await?;
        let dates: BTreeSet<NaiveDate> = removed.iter().filter_map(ReservationRecord::parsed_date).collect();
        let grids = regenerate(&store, self.spots(), dates);
        store.release();

        tracing::info!(removed = removed.len(), by = %actor.identity, "reservations purged");
        Ok(Purged {
            removed: removed.len(),
            grids,
        })
    }
}

fn regenerate(store: &ReservationStore, spots: &SpotDirectory, dates: BTreeSet<NaiveDate>) -> Vec<Grid> {
    dates
        .into_iter()
        .map(|date| build_grid(date, spots, store.on_date(date)))
        .collect()
}
