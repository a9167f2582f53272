use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Points,
    ProjectCompletion,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Goal {
    pub id: i64,
    pub goal_type: GoalType,
    pub target_points: Option<i64>,
    pub project_name: Option<String>,
    pub reward_description: String,
    pub deadline: Option<NaiveDate>,
    pub achieved: bool,
    pub achieved_date: Option<NaiveDate>,
    pub reward_claimed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGoalRequest {
    pub goal_type: GoalType,
    pub target_points: Option<i64>,
    pub project_name: Option<String>,
    pub reward_description: String,
    pub deadline: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGoalRequest {
    pub target_points: Option<i64>,
    pub project_name: Option<String>,
    pub reward_description: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub reward_claimed: Option<bool>,
}
