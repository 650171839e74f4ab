use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use utoipa::ToSchema;

const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Shift {
    pub id: u64,
    pub organization_id: u64,
    #[schema(example = "Morning")]
    pub name: String,
    #[schema(value_type = String, example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "17:00:00")]
    pub end_time: NaiveTime,
    #[schema(example = 10)]
    pub grace_minutes: i32,
    /// ISO weekday numbers, Monday = 1
    #[schema(value_type = Vec<u8>, example = json!([1, 2, 3, 4, 5]))]
    pub working_days: Json<Vec<u8>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const SHIFT_COLUMNS: &str = "id, organization_id, name, start_time, end_time, grace_minutes, \
     working_days, is_active, created_at, updated_at";

/// The timing part of a shift, used when classifying attendance.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub grace_minutes: i32,
    pub working_days: Vec<u8>,
}

impl Shift {
    pub fn window(&self) -> ShiftWindow {
        ShiftWindow {
            start: self.start_time,
            end: self.end_time,
            grace_minutes: self.grace_minutes,
            working_days: self.working_days.0.clone(),
        }
    }
}

impl ShiftWindow {
    /// Shift length in minutes; an end before the start crosses midnight.
    pub fn duration_minutes(&self) -> i64 {
        let d = (self.end - self.start).num_minutes();
        if d <= 0 { d + MINUTES_PER_DAY } else { d }
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().number_from_monday() as u8;
        self.working_days.contains(&weekday)
    }

    /// Minutes after the shift start, negative when early. Arrivals more
    /// than twelve hours away from the start are read as the other side of
    /// midnight.
    pub fn minutes_after_start(&self, arrival: NaiveTime) -> i64 {
        let delta = (arrival - self.start).num_minutes().rem_euclid(MINUTES_PER_DAY);
        if delta > MINUTES_PER_DAY / 2 {
            delta - MINUTES_PER_DAY
        } else {
            delta
        }
    }

    pub fn is_late(&self, arrival: NaiveTime) -> bool {
        self.minutes_after_start(arrival) > self.grace_minutes as i64
    }
}

pub fn validate_working_days(days: &[u8]) -> Result<(), String> {
    if days.is_empty() {
        return Err("working_days must not be empty".into());
    }
    if days.iter().any(|d| !(1..=7).contains(d)) {
        return Err("working_days must contain ISO weekday numbers 1-7".into());
    }
    Ok(())
}

pub fn validate_grace(grace_minutes: i32) -> Result<(), String> {
    if (0..=240).contains(&grace_minutes) {
        Ok(())
    } else {
        Err("grace_minutes must be between 0 and 240".into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn window(start: &str, end: &str, grace: i32) -> ShiftWindow {
        ShiftWindow {
            start: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
            grace_minutes: grace,
            working_days: vec![1, 2, 3, 4, 5],
        }
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn day_and_overnight_durations() {
        assert_eq!(window("09:00", "17:00", 0).duration_minutes(), 480);
        assert_eq!(window("22:00", "06:00", 0).duration_minutes(), 480);
    }

    #[test]
    fn lateness_respects_grace() {
        let w = window("09:00", "17:00", 10);
        assert!(!w.is_late(t("08:45")));
        assert!(!w.is_late(t("09:10")));
        assert!(w.is_late(t("09:11")));
    }

    #[test]
    fn overnight_shift_lateness_wraps_midnight() {
        let w = window("23:30", "07:30", 15);
        assert!(!w.is_late(t("23:20")));
        assert!(!w.is_late(t("23:45")));
        assert!(w.is_late(t("00:10")));
    }

    #[test]
    fn working_days_use_iso_numbers() {
        let w = window("09:00", "17:00", 0);
        // 2026-01-05 is a Monday, 2026-01-10 a Saturday
        assert!(w.is_working_day(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()));
        assert!(!w.is_working_day(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap()));
    }

    #[test]
    fn working_day_validation() {
        assert!(validate_working_days(&[1, 7]).is_ok());
        assert!(validate_working_days(&[]).is_err());
        assert!(validate_working_days(&[0]).is_err());
        assert!(validate_grace(-1).is_err());
    }
}
