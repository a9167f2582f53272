use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::work_item::RecurrenceKind;

/// A habit's schedule. Weekdays are numbered 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recurrence {
    None,
    Daily,
    EveryNDays { interval: u32 },
    Weekly { days: Vec<u8> },
}

impl Recurrence {
    pub fn kind(&self) -> RecurrenceKind {
        match self {
            Recurrence::None => RecurrenceKind::None,
            Recurrence::Daily => RecurrenceKind::Daily,
            Recurrence::EveryNDays { .. } => RecurrenceKind::EveryNDays,
            Recurrence::Weekly { .. } => RecurrenceKind::Weekly,
        }
    }

    pub fn interval(&self) -> Option<i64> {
        match self {
            Recurrence::EveryNDays { interval } => Some(*interval as i64),
            _ => None,
        }
    }

    /// JSON weekday array for the store, e.g. "[0,2,4]".
    pub fn days_json(&self) -> Option<String> {
        match self {
            Recurrence::Weekly { days } => Some(serde_json::to_string(days).unwrap_or_default()),
            _ => None,
        }
    }

    /// The next scheduled date after an occurrence on `completed`.
    /// `None` means the habit is terminal (one-shot, or an empty weekday set).
    pub fn next_occurrence(&self, completed: NaiveDate) -> Option<NaiveDate> {
        match self {
            Recurrence::None => None,
            Recurrence::Daily => Some(completed + Duration::days(1)),
            Recurrence::EveryNDays { interval } => {
                Some(completed + Duration::days((*interval).max(1) as i64))
            }
            Recurrence::Weekly { days } => {
                if days.is_empty() {
                    return None;
                }
                let mut d = completed + Duration::days(1);
                for _ in 0..7 {
                    if days.contains(&(d.weekday().num_days_from_monday() as u8)) {
                        return Some(d);
                    }
                    d += Duration::days(1);
                }
                None
            }
        }
    }
}
