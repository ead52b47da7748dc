mod calendar;
mod conflict;
mod error;
mod gate;
mod mutations;
mod queries;
mod rules;
mod store;

pub use calendar::{build_grid, empty_schedule};
pub use conflict::{find_conflict, overlaps};
pub use error::{ReservationError, ValidationCode};
pub use gate::{ConcurrencyGate, GateGuard};
pub use rules::{
    check_booking_window, check_display_name, check_identity, check_weekend, is_weekend, parse_date,
    parse_request, parse_window, ReservationRules, RulePolicy, ValidatedRequest,
};
pub use store::ReservationStore;

use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;

/// A committed reservation and the refreshed grid for its date.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
    pub reservation: ReservationRecord,
    pub grid: Grid,
    pub grid_date: String,
}

/// The grid after a cancellation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancelled {
    pub grid: Grid,
    pub grid_date: String,
    /// The cancelled record had no usable date, so `grid` shows today instead.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

/// Outcome of an admin purge: one grid per affected date, in date order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Purged {
    pub removed: usize,
    pub grids: Vec<Grid>,
}

/// Orchestrates rules, the gate, the overlap check, the store and the grid.
///
/// Every operation that touches the store holds the gate for its whole
/// read-check-write sequence. Rules run before the gate is taken since they
/// never read the store; the holiday lookup is remote and would otherwise
/// stall every waiter.
pub struct ReservationService {
    rules: ReservationRules,
    gate: ConcurrencyGate<ReservationStore>,
    clock: Arc<dyn Clock>,
    notify: NotifyHub,
    coordination_email: Option<String>,
}

impl ReservationService {
    pub fn new(rules: ReservationRules, store: ReservationStore, clock: Arc<dyn Clock>, notify: NotifyHub) -> Self {
        Self {
            rules,
            gate: ConcurrencyGate::new(store),
            clock,
            notify,
            coordination_email: None,
        }
    }

    /// Address that hears about weekend bookings.
    pub fn with_coordination_email(mut self, email: Option<String>) -> Self {
        self.coordination_email = email;
        self
    }

    pub fn spots(&self) -> &SpotDirectory {
        self.rules.spots()
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }

    fn spot_name(&self, spot_id: SpotId) -> String {
        self.spots()
            .get(spot_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("spot {spot_id}"))
    }
}
