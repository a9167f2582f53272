use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A date exempt from all penalty calculations.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RestDay {
    pub date: NaiveDate,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRestDayRequest {
    pub date: NaiveDate,
    pub description: Option<String>,
}
