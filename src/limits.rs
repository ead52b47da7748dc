/// Booking granularity in minutes.
pub const SLOT_MINUTES: u16 = 30;

/// Number of slots in one calendar day.
pub const SLOTS_PER_DAY: usize = 48;

/// Minutes in one calendar day; also the only valid "24:00" end time.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Default advance-booking window in days (inclusive of today + N).
pub const DEFAULT_BOOKING_WINDOW_DAYS: i64 = 14;

/// Spot-name prefix that blacks out weekends.
pub const WEEKEND_RESTRICTED_PREFIX: &str = "RADISON";

pub const MIN_DISPLAY_NAME_LEN: usize = 5;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;
pub const MAX_IDENTITY_LEN: usize = 254;

/// Bounded queue between the service and the notifier task.
pub const NOTIFY_QUEUE_CAPACITY: usize = 1024;

/// Longest request line accepted by the wire adapter.
pub const MAX_LINE_LEN: usize = 64 * 1024;
