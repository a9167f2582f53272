use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::core::recurrence::Recurrence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Active,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HabitType {
    Skill,
    Routine,
}

/// Store-level discriminant for the recurrence variant. The core works with
/// [`Recurrence`]; these three columns are how the store spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    None,
    Daily,
    EveryNDays,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkItem {
    pub id: i64,
    pub description: String,
    pub project: Option<String>,
    pub priority: i64,
    pub energy: i64,
    pub is_habit: bool,
    pub is_today: bool,
    pub status: ItemStatus,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub time_spent: i64,
    pub depends_on: Option<i64>,
    pub habit_type: Option<HabitType>,
    pub recur_kind: RecurrenceKind,
    pub recur_interval: Option<i64>,
    pub recur_days: Option<String>,
    pub streak: i64,
    pub last_completed_date: Option<NaiveDate>,
    pub daily_target: i64,
    pub daily_completed: i64,
}

impl WorkItem {
    /// Reassemble the tagged recurrence variant from its stored columns.
    /// Malformed weekday JSON degrades to an empty set (treated as terminal).
    pub fn recurrence(&self) -> Recurrence {
        match self.recur_kind {
            RecurrenceKind::None => Recurrence::None,
            RecurrenceKind::Daily => Recurrence::Daily,
            RecurrenceKind::EveryNDays => Recurrence::EveryNDays {
                interval: self.recur_interval.unwrap_or(1).max(1) as u32,
            },
            RecurrenceKind::Weekly => {
                let days = self
                    .recur_days
                    .as_deref()
                    .and_then(|s| serde_json::from_str::<Vec<u8>>(s).ok())
                    .unwrap_or_default();
                Recurrence::Weekly { days }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub description: String,
    pub project: Option<String>,
    pub priority: Option<i64>,
    pub energy: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub depends_on: Option<i64>,
    pub is_habit: Option<bool>,
    pub habit_type: Option<HabitType>,
    pub recurrence: Option<Recurrence>,
    pub daily_target: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateItemRequest {
    pub description: Option<String>,
    pub project: Option<String>,
    pub priority: Option<i64>,
    pub energy: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub depends_on: Option<i64>,
    pub habit_type: Option<HabitType>,
    pub recurrence: Option<Recurrence>,
    pub daily_target: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ItemListQuery {
    pub filter: Option<ItemFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemFilter {
    All,
    Pending,
    Active,
    Today,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub id: Option<i64>,
}
