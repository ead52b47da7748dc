use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::limits::*;

pub type SpotId = u32;
pub type ReservationId = Ulid;

/// ISO calendar date, the only date format on the wire and in the journal.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

// ── Spots ────────────────────────────────────────────────────────

/// Spots provisioned by a default deployment, ids assigned by position.
pub const DEFAULT_SPOT_NAMES: [&str; 27] = [
    "MATTA6060", "MATTA6067", "MISTRAL1017", "MISTRAL1018", "MISTRAL3005",
    "MISTRAL3006", "MISTRAL3100", "MISTRAL3101", "MISTRAL3103", "MISTRAL3104",
    "MISTRAL4087", "MISTRAL4088", "MISTRAL4089", "MISTRAL4090", "MISTRAL4137",
    "MISTRAL4140", "MISTRAL4147", "RADISON1", "RADISON2", "RADISON3",
    "RADISON4", "RADISON5", "RADISON6", "RADISON7", "RADISON8",
    "RADISON9", "RADISON10",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    pub id: SpotId,
    pub name: String,
}

impl Spot {
    /// Tagged spots never accept weekend reservations.
    pub fn is_weekend_restricted(&self) -> bool {
        self.name.starts_with(WEEKEND_RESTRICTED_PREFIX)
    }
}

/// The fixed set of spots, ordered by id. Immutable after provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotDirectory {
    spots: Vec<Spot>,
}

impl SpotDirectory {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spots = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Spot {
                id: i as SpotId + 1,
                name: name.into(),
            })
            .collect();
        Self { spots }
    }

    pub fn get(&self, id: SpotId) -> Option<&Spot> {
        let idx = (id as usize).checked_sub(1)?;
        self.spots.get(idx)
    }

    pub fn all(&self) -> &[Spot] {
        &self.spots
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }
}

impl Default for SpotDirectory {
    fn default() -> Self {
        Self::from_names(DEFAULT_SPOT_NAMES)
    }
}

// ── Wall-clock time ──────────────────────────────────────────────

/// Minutes from midnight. `24:00` is representable so the last slot has an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime(u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time {:?}, expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl WallTime {
    pub const MIDNIGHT: WallTime = WallTime(0);
    pub const END_OF_DAY: WallTime = WallTime(MINUTES_PER_DAY);

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        let total = hour.checked_mul(60)?.checked_add(minute)?;
        (total <= MINUTES_PER_DAY).then_some(WallTime(total))
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(WallTime(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn is_slot_aligned(self) -> bool {
        self.0 % SLOT_MINUTES == 0
    }

    /// Index of the slot containing this instant: `hour * 2 + minute / 30`.
    pub fn slot_floor(self) -> usize {
        (self.0 / SLOT_MINUTES) as usize
    }

    /// Index of the first slot boundary at or after this instant.
    pub fn slot_ceil(self) -> usize {
        self.0.div_ceil(SLOT_MINUTES) as usize
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for WallTime {
    type Err = ParseTimeError;

    /// Accepts `HH:MM`, plus `HH:MM:00` as stored by SQL `TIME` columns.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let mut parts = s.trim().split(':');
        let hour = parts.next().ok_or_else(err)?;
        let minute = parts.next().ok_or_else(err)?;
        if let Some(second) = parts.next()
            && second != "00"
        {
            return Err(err());
        }
        if parts.next().is_some() {
            return Err(err());
        }
        let two_digits = |p: &str| p.len() == 2 && p.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(hour) || !two_digits(minute) {
            return Err(err());
        }
        let hour: u16 = hour.parse().map_err(|_| err())?;
        let minute: u16 = minute.parse().map_err(|_| err())?;
        WallTime::from_hm(hour, minute).ok_or_else(err)
    }
}

impl Serialize for WallTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WallTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open window `[start, end)` within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWindow {
    pub start: WallTime,
    pub end: WallTime,
}

impl SlotWindow {
    pub fn new(start: WallTime, end: WallTime) -> Self {
        debug_assert!(start < end, "SlotWindow start must be before end");
        Self { start, end }
    }

    /// Slots touched by this window. A partially covered slot counts as touched.
    pub fn slot_range(&self) -> Range<usize> {
        self.start.slot_floor()..self.end.slot_ceil().min(SLOTS_PER_DAY)
    }
}

// ── Callers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// The authenticated caller, as established by the fronting layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user id or e-mail address.
    pub identity: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
}

impl Actor {
    pub fn new(identity: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn holds(&self, record: &ReservationRecord) -> bool {
        record.is_held_by(&self.identity)
    }
}

/// Booking request after boundary type checks; contents are not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub spot_id: SpotId,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

impl ReservationRequest {
    pub fn new(
        spot_id: SpotId,
        date: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            spot_id,
            date: date.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

/// Persisted reservation shape. Fields stay loosely typed so records written
/// by older deployments can still be loaded and classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub spot_id: SpotId,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub holder_identity: String,
    #[serde(default)]
    pub holder_name: Option<String>,
}

impl ReservationRecord {
    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity.eq_ignore_ascii_case(identity)
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, DATE_FORMAT).ok()
    }

    /// Classify a stored record against the current spot set.
    pub fn check(&self, spots: &SpotDirectory) -> Checked {
        let malformed = |reason: String| Checked::Malformed {
            id: self.id,
            reason,
        };
        if spots.get(self.spot_id).is_none() {
            return malformed(format!("references unknown spot {}", self.spot_id));
        }
        let Some(date) = self.parsed_date() else {
            return malformed(format!("unparsable date {:?}", self.date));
        };
        let (start, end) = match (self.start_time.parse::<WallTime>(), self.end_time.parse::<WallTime>()) {
            (Ok(s), Ok(e)) => (s, e),
            (Err(e), _) | (_, Err(e)) => return malformed(e.to_string()),
        };
        if start >= end {
            return malformed(format!("empty window {start}-{end}"));
        }
        Checked::Valid(Reservation {
            id: self.id,
            spot_id: self.spot_id,
            date,
            window: SlotWindow::new(start, end),
            holder_identity: self.holder_identity.clone(),
            holder_name: self.holder_name.clone(),
        })
    }
}

/// Outcome of classifying a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checked {
    Valid(Reservation),
    Malformed { id: ReservationId, reason: String },
}

/// A reservation whose fields have all been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub spot_id: SpotId,
    pub date: NaiveDate,
    pub window: SlotWindow,
    pub holder_identity: String,
    pub holder_name: Option<String>,
}

impl Reservation {
    /// Name shown on the grid; falls back to the identity.
    pub fn display_holder(&self) -> &str {
        self.holder_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.holder_identity)
    }

    pub fn to_record(&self) -> ReservationRecord {
        ReservationRecord {
            id: self.id,
            spot_id: self.spot_id,
            date: format_date(self.date),
            start_time: self.window.start.to_string(),
            end_time: self.window.end.to_string(),
            holder_identity: self.holder_identity.clone(),
            holder_name: self.holder_name.clone(),
        }
    }
}

// ── Grid ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub start_time: WallTime,
    pub end_time: WallTime,
    pub is_reserved: bool,
    pub reserved_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotSchedule {
    pub id: SpotId,
    pub name: String,
    pub time_slots: Vec<TimeSlot>,
}

/// Availability of every spot for one date. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    pub date: NaiveDate,
    pub spots: Vec<SpotSchedule>,
}

impl Grid {
    pub fn spot(&self, id: SpotId) -> Option<&SpotSchedule> {
        self.spots.iter().find(|s| s.id == id)
    }
}

// ── Journal events ───────────────────────────────────────────────

/// The journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated(ReservationRecord),
    ReservationCancelled { id: ReservationId },
    ReservationsPurged { ids: Vec<ReservationId> },
}
