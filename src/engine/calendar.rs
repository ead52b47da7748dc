use std::collections::HashMap;

use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

// ── Slot lattice ─────────────────────────────────────────────────

/// All 48 free slots of one spot.
pub fn empty_schedule(spot: &Spot) -> SpotSchedule {
    let time_slots = (0..SLOTS_PER_DAY as u16)
        .map(|i| TimeSlot {
            start_time: WallTime::from_minutes(i * SLOT_MINUTES).unwrap_or(WallTime::MIDNIGHT),
            end_time: WallTime::from_minutes((i + 1) * SLOT_MINUTES).unwrap_or(WallTime::END_OF_DAY),
            is_reserved: false,
            reserved_by: None,
        })
        .collect();
    SpotSchedule {
        id: spot.id,
        name: spot.name.clone(),
        time_slots,
    }
}

/// Overlay the reservations of `date` onto an empty lattice for every spot.
///
/// Records for other dates, orphaned records and records with unparsable
/// fields are skipped and logged. Pure: same inputs give the same grid.
pub fn build_grid<'a, I>(date: NaiveDate, spots: &SpotDirectory, records: I) -> Grid
where
    I: IntoIterator<Item = &'a ReservationRecord>,
{
    let mut schedules: Vec<SpotSchedule> = spots.all().iter().map(empty_schedule).collect();
    let index: HashMap<SpotId, usize> = schedules
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id, i))
        .collect();

    for record in records {
        let reservation = match record.check(spots) {
            Checked::Valid(r) => r,
            Checked::Malformed { id, reason } => {
                tracing::warn!(%id, %reason, "skipping malformed reservation while building grid");
                continue;
            }
        };
        if reservation.date != date {
            continue;
        }
        let Some(&pos) = index.get(&reservation.spot_id) else {
            continue;
        };
        let holder = reservation.display_holder().to_string();
        let slots = &mut schedules[pos].time_slots;
        for slot in &mut slots[reservation.window.slot_range()] {
            slot.is_reserved = true;
            slot.reserved_by = Some(holder.clone());
        }
    }

    Grid {
        date,
        spots: schedules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ulid::Ulid;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    fn rec(spot_id: SpotId, date: &str, start: &str, end: &str, name: Option<&str>) -> ReservationRecord {
        ReservationRecord {
            id: Ulid::new(),
            spot_id,
            date: date.into(),
            start_time: start.into(),
            end_time: end.into(),
            holder_identity: "luis.soto@example.com".into(),
            holder_name: name.map(Into::into),
        }
    }

    fn reserved(grid: &Grid, spot: SpotId) -> Vec<(String, Option<String>)> {
        grid.spot(spot)
            .unwrap()
            .time_slots
            .iter()
            .filter(|s| s.is_reserved)
            .map(|s| (s.start_time.to_string(), s.reserved_by.clone()))
            .collect()
    }

    #[test]
    fn empty_lattice_covers_the_day() {
        let spots = SpotDirectory::default();
        let grid = build_grid(day(), &spots, &[]);
        assert_eq!(grid.spots.len(), 27);
        let first = &grid.spots[0];
        assert_eq!(first.time_slots.len(), SLOTS_PER_DAY);
        assert_eq!(first.time_slots[0].start_time.to_string(), "00:00");
        assert_eq!(first.time_slots[0].end_time.to_string(), "00:30");
        assert_eq!(first.time_slots[47].start_time.to_string(), "23:30");
        assert_eq!(first.time_slots[47].end_time.to_string(), "24:00");
        assert!(grid.spots.iter().all(|s| s.time_slots.iter().all(|t| !t.is_reserved)));
        let ids: Vec<SpotId> = grid.spots.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=27).collect::<Vec<_>>());
    }

    #[test]
    fn reservation_marks_its_slots() {
        let spots = SpotDirectory::default();
        let records = [rec(1, "2026-10-20", "14:00", "15:00", Some("Luis Soto"))];
        let grid = build_grid(day(), &spots, &records);
        assert_eq!(
            reserved(&grid, 1),
            vec![
                ("14:00".to_string(), Some("Luis Soto".to_string())),
                ("14:30".to_string(), Some("Luis Soto".to_string())),
            ]
        );
        assert!(reserved(&grid, 2).is_empty());
    }

    #[test]
    fn holder_identity_used_without_name() {
        let spots = SpotDirectory::default();
        let records = [rec(4, "2026-10-20", "23:30", "24:00", None)];
        let grid = build_grid(day(), &spots, &records);
        assert_eq!(
            reserved(&grid, 4),
            vec![("23:30".to_string(), Some("luis.soto@example.com".to_string()))]
        );
    }

    #[test]
    fn other_dates_and_malformed_are_skipped() {
        let spots = SpotDirectory::default();
        let records = [
            rec(1, "2026-10-21", "09:00", "10:00", None),
            rec(77, "2026-10-20", "09:00", "10:00", None),
            rec(2, "2026-10-20", "nine", "10:00", None),
            rec(3, "2026-10-20", "11:00", "10:00", None),
            rec(5, "2026-10-20", "09:00", "09:30", Some("Eva Rojas")),
        ];
        let grid = build_grid(day(), &spots, &records);
        let total: usize = grid
            .spots
            .iter()
            .map(|s| s.time_slots.iter().filter(|t| t.is_reserved).count())
            .sum();
        assert_eq!(total, 1);
        assert_eq!(reserved(&grid, 5), vec![("09:00".to_string(), Some("Eva Rojas".to_string()))]);
    }

    #[test]
    fn legacy_unaligned_window_marks_touched_slots() {
        let spots = SpotDirectory::default();
        let records = [rec(1, "2026-10-20", "09:15", "10:10", None)];
        let grid = build_grid(day(), &spots, &records);
        let starts: Vec<String> = reserved(&grid, 1).into_iter().map(|(s, _)| s).collect();
        assert_eq!(starts, vec!["09:00", "09:30", "10:00"]);
    }

    fn hm(minutes: u16) -> String {
        WallTime::from_minutes(minutes).unwrap().to_string()
    }

    /// Stored rows as they may appear: unaligned legacy times, other dates,
    /// orphaned spots and the odd unparsable field.
    fn stored_record() -> impl Strategy<Value = ReservationRecord> {
        (
            1u32..=30,
            prop::sample::select(vec!["2026-10-20", "2026-10-21", "bad-date"]),
            0u16..MINUTES_PER_DAY,
            1u16..=300,
            prop::option::of("[A-Z][a-z]{2,8} [A-Z][a-z]{2,8}"),
            prop::bool::weighted(0.05),
        )
            .prop_map(|(spot_id, date, start, len, name, garbled)| {
                let end = (start + len).min(MINUTES_PER_DAY);
                let start = if garbled { "nine".to_string() } else { hm(start) };
                rec(spot_id, date, &start, &hm(end), name.as_deref())
            })
    }

    proptest! {
        #[test]
        fn build_is_idempotent(records in prop::collection::vec(stored_record(), 0..40)) {
            let spots = SpotDirectory::default();
            let a = build_grid(day(), &spots, &records);
            let b = build_grid(day(), &spots, &records);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
        }

        #[test]
        fn marked_slots_are_exactly_the_valid_windows(records in prop::collection::vec(stored_record(), 0..40)) {
            let spots = SpotDirectory::default();
            let grid = build_grid(day(), &spots, &records);
            for schedule in &grid.spots {
                let mut expected = [false; SLOTS_PER_DAY];
                for record in records.iter().filter(|r| r.spot_id == schedule.id) {
                    if let Checked::Valid(r) = record.check(&spots)
                        && r.date == day()
                    {
                        for slot in r.window.slot_range() {
                            expected[slot] = true;
                        }
                    }
                }
                let marked: Vec<bool> = schedule.time_slots.iter().map(|t| t.is_reserved).collect();
                prop_assert_eq!(marked, expected.to_vec());
            }
        }
    }
}
