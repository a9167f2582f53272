use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{AppError, AppResult};
use crate::models::settings::Settings;

/// Parse a schedule string of the form "HH:MM".
pub fn parse_hhmm(s: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| AppError::Validation(format!("Invalid time string: {s:?} (expected HH:MM)")))
}

/// The operator's subjective "today". With the day-start switch off this is
/// the calendar date; with it on, any instant before `day_start` still
/// belongs to the previous date.
pub fn effective_date(now: NaiveDateTime, day_start_enabled: bool, day_start: NaiveTime) -> NaiveDate {
    if day_start_enabled && now.time() < day_start {
        now.date() - Duration::days(1)
    } else {
        now.date()
    }
}

pub fn is_new_day(now: NaiveDateTime, day_start_enabled: bool, day_start: NaiveTime, last: NaiveDate) -> bool {
    effective_date(now, day_start_enabled, day_start) > last
}

/// Effective date for a wall-clock instant under the stored settings.
pub fn effective_for(settings: &Settings, now: NaiveDateTime) -> AppResult<NaiveDate> {
    let day_start = parse_hhmm(&settings.day_start_time)?;
    Ok(effective_date(now, settings.day_start_enabled, day_start))
}

/// Effective date right now, in the process-local timezone.
pub fn effective_today(settings: &Settings) -> AppResult<NaiveDate> {
    effective_for(settings, Local::now().naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        d.and_time(NaiveTime::parse_from_str(time, "%H:%M").unwrap())
    }

    #[test]
    fn test_effective_date_without_day_start() {
        let t = parse_hhmm("06:00").unwrap();
        assert_eq!(
            effective_date(at("2026-03-10", "00:30"), false, t),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
        );
    }

    #[test]
    fn test_effective_date_before_day_start_is_yesterday() {
        let t = parse_hhmm("06:00").unwrap();
        assert_eq!(
            effective_date(at("2026-03-10", "05:59"), true, t),
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
        );
        assert_eq!(
            effective_date(at("2026-03-10", "06:00"), true, t),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
        );
    }

    #[test]
    fn test_is_new_day() {
        let t = parse_hhmm("06:00").unwrap();
        let last = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert!(!is_new_day(at("2026-03-10", "05:00"), true, t, last));
        assert!(is_new_day(at("2026-03-10", "07:00"), true, t, last));
    }

    #[test]
    fn test_parse_hhmm_rejects_garbage() {
        assert!(parse_hhmm("6am").is_err());
        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("06:00").is_ok());
    }
}
