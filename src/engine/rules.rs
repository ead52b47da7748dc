use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde_json::Value;

use crate::holiday::HolidayCalendar;
use crate::limits::*;
use crate::model::*;

use super::error::{ReservationError, ValidationCode};

/// Deployment-tunable parts of the booking policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePolicy {
    /// Last bookable day is `today + booking_window_days`.
    pub booking_window_days: i64,
    /// When set, e-mail identities must belong to this domain.
    pub allowed_email_domain: Option<String>,
    /// Country code handed to the holiday lookup.
    pub holiday_country: String,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            booking_window_days: DEFAULT_BOOKING_WINDOW_DAYS,
            allowed_email_domain: None,
            holiday_country: "CL".to_string(),
        }
    }
}

/// A request that passed every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub spot: Spot,
    pub date: NaiveDate,
    pub window: SlotWindow,
}

/// Business policy checks. Never reads the reservation store.
pub struct ReservationRules {
    spots: Arc<SpotDirectory>,
    holidays: Arc<dyn HolidayCalendar>,
    policy: RulePolicy,
}

fn invalid(code: ValidationCode, message: impl Into<String>) -> ReservationError {
    ReservationError::validation(code, message)
}

impl ReservationRules {
    pub fn new(spots: Arc<SpotDirectory>, holidays: Arc<dyn HolidayCalendar>, policy: RulePolicy) -> Self {
        Self {
            spots,
            holidays,
            policy,
        }
    }

    pub fn spots(&self) -> &SpotDirectory {
        &self.spots
    }

    /// Run every rule in order, stopping at the first failure.
    pub async fn validate(
        &self,
        request: &ReservationRequest,
        actor: &Actor,
        now: NaiveDateTime,
    ) -> Result<ValidatedRequest, ReservationError> {
        check_required(request)?;
        check_display_name(&actor.name)?;
        check_identity(&actor.identity, self.policy.allowed_email_domain.as_deref())?;

        let spot = self
            .spots
            .get(request.spot_id)
            .cloned()
            .ok_or(ReservationError::SpotNotFound(request.spot_id))?;

        let date = parse_date(&request.date)?;
        check_booking_window(date, now.date(), self.policy.booking_window_days)?;
        check_weekend(&spot, date)?;
        self.check_holiday(date).await?;
        let window = parse_window(&request.start_time, &request.end_time)?;
        check_not_elapsed(date, window.start, now)?;

        Ok(ValidatedRequest { spot, date, window })
    }

    async fn check_holiday(&self, date: NaiveDate) -> Result<(), ReservationError> {
        let country = &self.policy.holiday_country;
        match self.holidays.is_holiday(country, date).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(invalid(
                ValidationCode::Holiday,
                format!("{} is a public holiday", format_date(date)),
            )),
            Err(e) => {
                tracing::warn!(%country, date = %format_date(date), error = %e, "holiday lookup failed");
                Err(ReservationError::Upstream(format!("holiday lookup failed: {e}")))
            }
        }
    }
}

// ── Boundary conversion ──────────────────────────────────────────

fn required_str<'a>(body: &'a Value, field: &str) -> Result<&'a str, ReservationError> {
    match body.get(field) {
        None | Some(Value::Null) => Err(invalid(ValidationCode::MissingField, format!("{field} is required"))),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(invalid(ValidationCode::MissingField, format!("{field} is required"))),
        Some(_) => Err(invalid(ValidationCode::MissingField, format!("{field} must be a string"))),
    }
}

/// Turn a loosely-typed body into a [`ReservationRequest`].
pub fn parse_request(body: &Value) -> Result<ReservationRequest, ReservationError> {
    let spot_id = match body.get("spotId") {
        None | Some(Value::Null) => return Err(invalid(ValidationCode::MissingField, "spotId is required")),
        Some(v) => v
            .as_u64()
            .filter(|&n| n >= 1)
            .and_then(|n| SpotId::try_from(n).ok())
            .ok_or_else(|| invalid(ValidationCode::MissingField, "spotId must be a positive integer"))?,
    };
    Ok(ReservationRequest::new(
        spot_id,
        required_str(body, "date")?,
        required_str(body, "startTime")?,
        required_str(body, "endTime")?,
    ))
}

// ── Individual rules ─────────────────────────────────────────────

fn check_required(request: &ReservationRequest) -> Result<(), ReservationError> {
    let fields = [
        ("date", &request.date),
        ("startTime", &request.start_time),
        ("endTime", &request.end_time),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            return Err(invalid(ValidationCode::MissingField, format!("{field} is required")));
        }
    }
    if request.spot_id == 0 {
        return Err(invalid(ValidationCode::MissingField, "spotId must be a positive integer"));
    }
    Ok(())
}

/// A first and last name: printable, at least two words.
pub fn check_display_name(name: &str) -> Result<(), ReservationError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if !(MIN_DISPLAY_NAME_LEN..=MAX_DISPLAY_NAME_LEN).contains(&len) {
        return Err(invalid(
            ValidationCode::InvalidName,
            format!("name must be between {MIN_DISPLAY_NAME_LEN} and {MAX_DISPLAY_NAME_LEN} characters"),
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(invalid(ValidationCode::InvalidName, "name contains unprintable characters"));
    }
    if trimmed.split_whitespace().count() < 2 {
        return Err(invalid(ValidationCode::InvalidName, "name must include first and last name"));
    }
    Ok(())
}

pub fn check_identity(identity: &str, allowed_domain: Option<&str>) -> Result<(), ReservationError> {
    if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN || identity.chars().any(char::is_whitespace) {
        return Err(invalid(ValidationCode::InvalidIdentity, "caller identity is malformed"));
    }
    if let Some((local, domain)) = identity.rsplit_once('@') {
        if local.is_empty() || domain.is_empty() {
            return Err(invalid(ValidationCode::InvalidIdentity, "caller e-mail is malformed"));
        }
        if let Some(allowed) = allowed_domain
            && !domain.eq_ignore_ascii_case(allowed)
        {
            return Err(invalid(
                ValidationCode::InvalidIdentity,
                format!("only @{allowed} addresses may book"),
            ));
        }
    }
    Ok(())
}

/// Parse a bare ISO date as a local calendar day; no timezone is involved.
pub fn parse_date(raw: &str) -> Result<NaiveDate, ReservationError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| invalid(ValidationCode::InvalidDate, format!("invalid date {raw:?}, expected YYYY-MM-DD")))
}

pub fn check_booking_window(date: NaiveDate, today: NaiveDate, window_days: i64) -> Result<(), ReservationError> {
    if date < today {
        return Err(invalid(ValidationCode::PastDate, "cannot book a date in the past"));
    }
    if date > today + Duration::days(window_days) {
        return Err(invalid(
            ValidationCode::OutsideWindow,
            format!("reservations open at most {window_days} days in advance"),
        ));
    }
    Ok(())
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Weekends are open except on weekend-restricted spots.
pub fn check_weekend(spot: &Spot, date: NaiveDate) -> Result<(), ReservationError> {
    if is_weekend(date) && spot.is_weekend_restricted() {
        return Err(invalid(
            ValidationCode::WeekendRestricted,
            format!("{} cannot be reserved on weekends", spot.name),
        ));
    }
    Ok(())
}

/// Both ends on a 30-minute boundary, start before end. `24:00` only ends a window.
pub fn parse_window(start: &str, end: &str) -> Result<SlotWindow, ReservationError> {
    let parse = |raw: &str| {
        raw.parse::<WallTime>()
            .map_err(|e| invalid(ValidationCode::InvalidTime, e.to_string()))
    };
    let start = parse(start)?;
    let end = parse(end)?;
    if start == WallTime::END_OF_DAY {
        return Err(invalid(ValidationCode::InvalidTime, "24:00 is only valid as an end time"));
    }
    if !start.is_slot_aligned() || !end.is_slot_aligned() {
        return Err(invalid(
            ValidationCode::MisalignedTime,
            format!("times must fall on {SLOT_MINUTES}-minute boundaries"),
        ));
    }
    if start >= end {
        return Err(invalid(ValidationCode::InvalidTimeRange, "start time must be before end time"));
    }
    Ok(SlotWindow::new(start, end))
}

/// A window starting before the current local time cannot be booked.
pub fn check_not_elapsed(date: NaiveDate, start: WallTime, now: NaiveDateTime) -> Result<(), ReservationError> {
    let Some(start_time) = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(start.minutes()) * 60, 0) else {
        return Ok(());
    };
    if date.and_time(start_time) < now {
        return Err(invalid(
            ValidationCode::PastTime,
            format!("{start} on {} has already passed", format_date(date)),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holiday::{FixedHolidays, HolidayError};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    // Monday.
    fn today() -> NaiveDate {
        d("2026-10-19")
    }

    // 08:00 on the Monday.
    fn now() -> NaiveDateTime {
        today().and_hms_opt(8, 0, 0).unwrap()
    }

    fn actor() -> Actor {
        Actor::new("ana.perez@example.com", "Ana Perez", Role::User)
    }

    fn rules_with(holidays: Arc<dyn HolidayCalendar>, policy: RulePolicy) -> ReservationRules {
        ReservationRules::new(Arc::new(SpotDirectory::default()), holidays, policy)
    }

    fn rules() -> ReservationRules {
        rules_with(Arc::new(FixedHolidays::new([d("2026-10-21")])), RulePolicy::default())
    }

    fn code(result: Result<ValidatedRequest, ReservationError>) -> ValidationCode {
        result.unwrap_err().validation_code().expect("validation error")
    }

    struct Down;

    #[async_trait]
    impl HolidayCalendar for Down {
        async fn is_holiday(&self, _: &str, _: NaiveDate) -> Result<bool, HolidayError> {
            Err(HolidayError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn accepts_valid_request() {
        let req = ReservationRequest::new(1, "2026-10-20", "14:00", "15:00");
        let ok = rules().validate(&req, &actor(), now()).await.unwrap();
        assert_eq!(ok.spot.name, "MATTA6060");
        assert_eq!(ok.date, d("2026-10-20"));
        assert_eq!(ok.window.start.to_string(), "14:00");
        assert_eq!(ok.window.end.to_string(), "15:00");
    }

    #[tokio::test]
    async fn weekend_restricted_spot_rejected() {
        // Spot 18 is RADISON1; 2026-10-24 is a Saturday.
        for (date, start, end) in [("2026-10-24", "08:00", "09:00"), ("2026-10-25", "00:00", "24:00")] {
            let req = ReservationRequest::new(18, date, start, end);
            assert_eq!(
                code(rules().validate(&req, &actor(), now()).await),
                ValidationCode::WeekendRestricted
            );
        }
    }

    #[tokio::test]
    async fn weekend_open_on_other_spots() {
        let req = ReservationRequest::new(3, "2026-10-24", "08:00", "09:00");
        assert!(rules().validate(&req, &actor(), now()).await.is_ok());
    }

    #[tokio::test]
    async fn date_window_enforced() {
        let r = rules();
        let far = ReservationRequest::new(1, "2026-11-08", "09:00", "10:00");
        assert_eq!(code(r.validate(&far, &actor(), now()).await), ValidationCode::OutsideWindow);
        let past = ReservationRequest::new(1, "2026-10-18", "09:00", "10:00");
        assert_eq!(code(r.validate(&past, &actor(), now()).await), ValidationCode::PastDate);
        let last = ReservationRequest::new(1, "2026-11-02", "09:00", "10:00");
        assert!(r.validate(&last, &actor(), now()).await.is_ok());
        let same_day = ReservationRequest::new(1, "2026-10-19", "09:00", "10:00");
        assert!(r.validate(&same_day, &actor(), now()).await.is_ok());
    }

    #[tokio::test]
    async fn elapsed_start_rejected_today() {
        let r = rules();
        let late = today().and_hms_opt(9, 56, 0).unwrap();
        let gone = ReservationRequest::new(1, "2026-10-19", "00:00", "00:30");
        assert_eq!(code(r.validate(&gone, &actor(), late).await), ValidationCode::PastTime);
        // Started six minutes ago, still running: rejected too.
        let running = ReservationRequest::new(1, "2026-10-19", "09:30", "11:00");
        assert_eq!(code(r.validate(&running, &actor(), late).await), ValidationCode::PastTime);
        let next = ReservationRequest::new(1, "2026-10-19", "10:00", "11:00");
        assert!(r.validate(&next, &actor(), late).await.is_ok());
        // Tomorrow's early slot is unaffected by today's clock.
        let tomorrow = ReservationRequest::new(1, "2026-10-20", "00:00", "00:30");
        assert!(r.validate(&tomorrow, &actor(), late).await.is_ok());
    }

    #[test]
    fn start_at_current_minute_is_still_open() {
        let at_ten = today().and_hms_opt(10, 0, 0).unwrap();
        let ten = WallTime::from_hm(10, 0).unwrap();
        assert!(check_not_elapsed(today(), ten, at_ten).is_ok());
        let just_after = today().and_hms_opt(10, 0, 1).unwrap();
        let err = check_not_elapsed(today(), ten, just_after).unwrap_err();
        assert_eq!(err.validation_code(), Some(ValidationCode::PastTime));
    }

    fn weekend_date() -> impl Strategy<Value = NaiveDate> {
        // Any Saturday or Sunday from 2024 onward.
        (0i64..520, prop::bool::ANY).prop_map(|(week, sunday)| {
            d("2024-01-06") + Duration::weeks(week) + Duration::days(i64::from(sunday))
        })
    }

    proptest! {
        #[test]
        fn window_accepts_exactly_today_through_window(offset in -400i64..400, window_days in 0i64..=30) {
            let date = today() + Duration::days(offset);
            let result = check_booking_window(date, today(), window_days);
            prop_assert_eq!(result.is_ok(), (0..=window_days).contains(&offset));
            if offset < 0 {
                prop_assert_eq!(result.unwrap_err().validation_code(), Some(ValidationCode::PastDate));
            } else if offset > window_days {
                prop_assert_eq!(result.unwrap_err().validation_code(), Some(ValidationCode::OutsideWindow));
            }
        }

        #[test]
        fn weekends_closed_on_every_restricted_spot(date in weekend_date()) {
            prop_assert!(is_weekend(date));
            let spots = SpotDirectory::default();
            let restricted: Vec<&Spot> = spots.all().iter().filter(|s| s.is_weekend_restricted()).collect();
            prop_assert!(!restricted.is_empty());
            for spot in restricted {
                let err = check_weekend(spot, date).unwrap_err();
                prop_assert_eq!(err.validation_code(), Some(ValidationCode::WeekendRestricted));
            }
            for spot in spots.all().iter().filter(|s| !s.is_weekend_restricted()) {
                prop_assert!(check_weekend(spot, date).is_ok());
            }
        }

        #[test]
        fn weekdays_open_on_every_spot(week in 0i64..520, day in 0i64..5) {
            // 2024-01-01 is a Monday.
            let date = d("2024-01-01") + Duration::weeks(week) + Duration::days(day);
            for spot in SpotDirectory::default().all() {
                prop_assert!(check_weekend(spot, date).is_ok());
            }
        }
    }

    #[tokio::test]
    async fn misaligned_times_rejected() {
        let r = rules();
        let req = ReservationRequest::new(1, "2026-10-20", "09:15", "10:00");
        assert_eq!(code(r.validate(&req, &actor(), now()).await), ValidationCode::MisalignedTime);
        let req = ReservationRequest::new(1, "2026-10-20", "09:00", "10:45");
        assert_eq!(code(r.validate(&req, &actor(), now()).await), ValidationCode::MisalignedTime);
    }

    #[test]
    fn time_range_rules() {
        assert!(parse_window("23:30", "24:00").is_ok());
        let err = |s, e| parse_window(s, e).unwrap_err().validation_code().unwrap();
        assert_eq!(err("10:00", "10:00"), ValidationCode::InvalidTimeRange);
        assert_eq!(err("11:00", "10:00"), ValidationCode::InvalidTimeRange);
        assert_eq!(err("24:00", "24:00"), ValidationCode::InvalidTime);
        assert_eq!(err("noon", "13:00"), ValidationCode::InvalidTime);
        assert_eq!(err("10:00", "24:30"), ValidationCode::InvalidTime);
    }

    #[tokio::test]
    async fn holiday_rejected_and_lookup_failure_is_upstream() {
        let req = ReservationRequest::new(1, "2026-10-21", "09:00", "10:00");
        assert_eq!(code(rules().validate(&req, &actor(), now()).await), ValidationCode::Holiday);

        let down = rules_with(Arc::new(Down), RulePolicy::default());
        let req = ReservationRequest::new(1, "2026-10-20", "09:00", "10:00");
        let err = down.validate(&req, &actor(), now()).await.unwrap_err();
        assert!(matches!(err, ReservationError::Upstream(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn checks_short_circuit_in_order() {
        let r = rules();
        // Unknown spot wins over a bad date.
        let req = ReservationRequest::new(99, "garbage", "09:15", "10:00");
        assert!(matches!(
            r.validate(&req, &actor(), now()).await,
            Err(ReservationError::SpotNotFound(99))
        ));
        // Bad name wins over unknown spot.
        let bad_name = Actor::new("ana.perez@example.com", "Ana", Role::User);
        assert_eq!(code(r.validate(&req, &bad_name, now()).await), ValidationCode::InvalidName);
        // Window wins over misaligned time.
        let req = ReservationRequest::new(1, "2026-12-01", "09:15", "10:00");
        assert_eq!(code(r.validate(&req, &actor(), now()).await), ValidationCode::OutsideWindow);
        // Holiday wins over misaligned time.
        let req = ReservationRequest::new(1, "2026-10-21", "09:15", "10:00");
        assert_eq!(code(r.validate(&req, &actor(), now()).await), ValidationCode::Holiday);
    }

    #[test]
    fn display_names() {
        assert!(check_display_name("Ana Perez").is_ok());
        assert!(check_display_name("  José  María Ñuñez ").is_ok());
        let long = "x y".repeat(20);
        for bad in ["", "Ana", "AnaPerez", "A B", "Ana\u{7}Perez x", long.as_str()] {
            assert!(check_display_name(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn identities() {
        assert!(check_identity("u-1042", None).is_ok());
        assert!(check_identity("ana@example.com", Some("example.com")).is_ok());
        assert!(check_identity("ana@EXAMPLE.com", Some("example.com")).is_ok());
        assert!(check_identity("ana@other.org", Some("example.com")).is_err());
        assert!(check_identity("ana@other.org", None).is_ok());
        assert!(check_identity("", None).is_err());
        assert!(check_identity("ana perez", None).is_err());
        assert!(check_identity("@example.com", None).is_err());
    }

    #[test]
    fn dates_parse_as_local_days() {
        assert_eq!(parse_date("2026-10-20").unwrap(), d("2026-10-20"));
        assert!(parse_date("2026-02-30").is_err());
        assert!(parse_date("20-10-2026").is_err());
        assert!(parse_date("2026-10-20T00:00:00Z").is_err());
    }

    #[test]
    fn request_boundary() {
        let req = parse_request(&json!({
            "spotId": 4, "date": "2026-10-20", "startTime": "08:00", "endTime": "09:00"
        }))
        .unwrap();
        assert_eq!(req, ReservationRequest::new(4, "2026-10-20", "08:00", "09:00"));

        let cases = [
            json!({"date": "2026-10-20", "startTime": "08:00", "endTime": "09:00"}),
            json!({"spotId": 0, "date": "2026-10-20", "startTime": "08:00", "endTime": "09:00"}),
            json!({"spotId": "4", "date": "2026-10-20", "startTime": "08:00", "endTime": "09:00"}),
            json!({"spotId": 4.5, "date": "2026-10-20", "startTime": "08:00", "endTime": "09:00"}),
            json!({"spotId": 5000000000u64, "date": "2026-10-20", "startTime": "08:00", "endTime": "09:00"}),
            json!({"spotId": 4, "date": "", "startTime": "08:00", "endTime": "09:00"}),
            json!({"spotId": 4, "date": "2026-10-20", "startTime": 800, "endTime": "09:00"}),
            json!({"spotId": 4, "date": "2026-10-20", "startTime": "08:00"}),
        ];
        for body in cases {
            let err = parse_request(&body).unwrap_err();
            assert_eq!(err.validation_code(), Some(ValidationCode::MissingField), "{body}");
        }
    }
}
