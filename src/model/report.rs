use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::model::attendance::{AttendanceStatus, round2};

/// Status counts over a set of attendance records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttendanceSummary {
    pub total_records: i64,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub half_day: i64,
    pub on_leave: i64,
    /// (present + late + half_day) / total * 100, two decimals
    #[schema(example = 92.5)]
    pub attendance_rate: f64,
}

impl AttendanceSummary {
    pub fn add(&mut self, status: &str, count: i64) {
        self.total_records += count;
        match status.parse::<AttendanceStatus>() {
            Ok(AttendanceStatus::Present) => self.present += count,
            Ok(AttendanceStatus::Late) => self.late += count,
            Ok(AttendanceStatus::Absent) => self.absent += count,
            Ok(AttendanceStatus::HalfDay) => self.half_day += count,
            Ok(AttendanceStatus::OnLeave) => self.on_leave += count,
            // counted in the total only
            Err(_) => {}
        }
        self.attendance_rate = rate(self.present + self.late + self.half_day, self.total_records);
    }

    pub fn from_counts(counts: &[(String, i64)]) -> Self {
        counts.iter().fold(Self::default(), |mut s, (status, n)| {
            s.add(status, *n);
            s
        })
    }
}

fn rate(attended: i64, total: i64) -> f64 {
    if total <= 0 {
        0.0
    } else {
        round2(attended as f64 / total as f64 * 100.0)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub department_id: Option<u64>,
    pub summary: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepartmentSummary {
    /// `None` groups employees without a department
    pub department_id: Option<u64>,
    pub department_name: Option<String>,
    pub summary: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmployeeSummary {
    pub employee_id: u64,
    pub employee_code: String,
    pub full_name: String,
    pub total_work_hours: f64,
    pub summary: AttendanceSummary,
}

/// `(department_id, department_name, status, count)` grouped rows.
pub type DepartmentCountRow = (Option<u64>, Option<String>, String, i64);

pub fn group_by_department(rows: Vec<DepartmentCountRow>) -> Vec<DepartmentSummary> {
    let mut groups: BTreeMap<Option<u64>, DepartmentSummary> = BTreeMap::new();
    for (department_id, name, status, count) in rows {
        groups
            .entry(department_id)
            .or_insert_with(|| DepartmentSummary {
                department_id,
                department_name: name,
                summary: AttendanceSummary::default(),
            })
            .summary
            .add(&status, count);
    }
    groups.into_values().collect()
}

/// `(employee_id, employee_code, first_name, last_name, status, count, hours)`.
pub type EmployeeCountRow = (u64, String, String, String, String, i64, f64);

pub fn group_by_employee(rows: Vec<EmployeeCountRow>) -> Vec<EmployeeSummary> {
    let mut groups: BTreeMap<u64, EmployeeSummary> = BTreeMap::new();
    for (employee_id, code, first, last, status, count, hours) in rows {
        let entry = groups.entry(employee_id).or_insert_with(|| EmployeeSummary {
            employee_id,
            employee_code: code,
            full_name: format!("{first} {last}"),
            total_work_hours: 0.0,
            summary: AttendanceSummary::default(),
        });
        entry.summary.add(&status, count);
        entry.total_work_hours = round2(entry.total_work_hours + hours);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(v: &[(&str, i64)]) -> Vec<(String, i64)> {
        v.iter().map(|(s, n)| (s.to_string(), *n)).collect()
    }

    #[test]
    fn empty_range_has_zero_rate() {
        let s = AttendanceSummary::from_counts(&[]);
        assert_eq!(s.total_records, 0);
        assert_eq!(s.attendance_rate, 0.0);
    }

    #[test]
    fn rate_counts_present_late_and_half_days() {
        let s = AttendanceSummary::from_counts(&counts(&[
            ("present", 5),
            ("late", 1),
            ("half_day", 1),
            ("absent", 2),
        ]));
        assert_eq!(s.total_records, 9);
        assert_eq!(s.present, 5);
        assert_eq!(s.attendance_rate, 77.78);
    }

    #[test]
    fn on_leave_lowers_the_rate() {
        let s = AttendanceSummary::from_counts(&counts(&[("present", 1), ("on_leave", 2)]));
        assert_eq!(s.on_leave, 2);
        assert_eq!(s.attendance_rate, 33.33);
    }

    #[test]
    fn department_rows_are_grouped() {
        let rows = vec![
            (Some(1), Some("Ops".to_string()), "present".to_string(), 3),
            (Some(1), Some("Ops".to_string()), "absent".to_string(), 1),
            (None, None, "late".to_string(), 2),
        ];
        let out = group_by_department(rows);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].department_id, None);
        assert_eq!(out[0].summary.attendance_rate, 100.0);
        assert_eq!(out[1].summary.total_records, 4);
        assert_eq!(out[1].summary.attendance_rate, 75.0);
    }

    #[test]
    fn employee_rows_sum_hours() {
        let row = |status: &str, n, h| {
            (7u64, "E7".to_string(), "Ada".to_string(), "Lee".to_string(), status.to_string(), n, h)
        };
        let out = group_by_employee(vec![row("present", 2, 16.5), row("half_day", 1, 3.25)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].full_name, "Ada Lee");
        assert_eq!(out[0].total_work_hours, 19.75);
        assert_eq!(out[0].summary.total_records, 3);
    }
}
