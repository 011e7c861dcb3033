use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LeaveId, UserId};
use crate::errors::ValidationFailure;

wire_enum!(LeaveStatus {
    Active => "active",
    Cancelled => "cancelled",
});

/// Inclusive date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(rename = "start_date")]
    pub start: NaiveDate,
    #[serde(rename = "end_date")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationFailure> {
        if end < start {
            return Err(ValidationFailure::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        !(self.end < other.start || self.start > other.end)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leave {
    pub id: LeaveId,
    pub user_id: UserId,
    pub backup_user_id: UserId,
    #[serde(flatten)]
    pub range: DateRange,
    pub reason: String,
    pub status: LeaveStatus,
    pub created_at: DateTime<Utc>,
}

impl Leave {
    pub fn is_active(&self) -> bool {
        self.status == LeaveStatus::Active
    }

    pub fn is_active_on(&self, day: NaiveDate) -> bool {
        self.is_active() && self.range.contains(day)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaveFilter {
    pub user_id: Option<UserId>,
    pub backup_user_id: Option<UserId>,
    pub active_only: bool,
}

impl LeaveFilter {
    pub fn active() -> Self {
        Self { active_only: true, ..Self::default() }
    }

    pub fn matches(&self, leave: &Leave) -> bool {
        self.user_id.as_ref().map_or(true, |id| &leave.user_id == id)
            && self.backup_user_id.as_ref().map_or(true, |id| &leave.backup_user_id == id)
            && (!self.active_only || leave.is_active())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::DateRange;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).expect("valid date")
    }

    #[test]
    fn ranges_sharing_a_boundary_day_overlap() {
        let first = DateRange::new(day(1), day(5)).expect("range");
        let second = DateRange::new(day(5), day(9)).expect("range");
        let third = DateRange::new(day(6), day(9)).expect("range");

        assert!(first.overlaps(&second));
        assert!(!first.overlaps(&third));
        assert!(third.overlaps(&second));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(DateRange::new(day(9), day(1)).is_err());
        assert!(DateRange::single(day(3)).contains(day(3)));
    }

    #[test]
    fn range_serializes_with_wire_field_names() {
        let range = DateRange::new(day(1), day(2)).expect("range");
        let json = serde_json::to_value(range).expect("serialize");
        assert_eq!(json["start_date"], "2026-05-01");
        assert_eq!(json["end_date"], "2026-05-02");
    }
}
