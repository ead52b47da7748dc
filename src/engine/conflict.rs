use crate::model::*;

/// Half-open intersection test. Back-to-back windows do not overlap.
pub fn overlaps(a: &SlotWindow, b: &SlotWindow) -> bool {
    a.start < b.end && a.end > b.start
}

/// First existing reservation whose window intersects `candidate`.
///
/// `existing` must already be narrowed to the candidate's spot and date.
pub fn find_conflict<'a, I>(candidate: &SlotWindow, existing: I) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing
        .into_iter()
        .find(|r| overlaps(candidate, &r.window))
}

/// Parse the stored records for one spot and date, dropping malformed ones.
pub(crate) fn reservations_for<'a, I>(
    records: I,
    spots: &SpotDirectory,
    spot_id: SpotId,
) -> Vec<Reservation>
where
    I: IntoIterator<Item = &'a ReservationRecord>,
{
    records
        .into_iter()
        .filter(|r| r.spot_id == spot_id)
        .filter_map(|r| match r.check(spots) {
            Checked::Valid(res) => Some(res),
            Checked::Malformed { id, reason } => {
                tracing::warn!(%id, %reason, "ignoring malformed reservation in conflict check");
                None
            }
        })
        .collect()
}
