use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{Local, Utc};

use crate::core::{dates, scoring};
use crate::error::{AppError, AppResult};
use crate::models::goal::{CreateGoalRequest, Goal, GoalType, UpdateGoalRequest};
use crate::models::settings::Settings;
use crate::AppState;

pub async fn list_goals(State(state): State<AppState>) -> AppResult<Json<Vec<Goal>>> {
    let goals = sqlx::query_as::<_, Goal>("SELECT * FROM goals ORDER BY id")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(goals))
}

pub async fn create_goal(
    State(state): State<AppState>,
    Json(body): Json<CreateGoalRequest>,
) -> AppResult<Json<Goal>> {
    if body.reward_description.trim().is_empty() {
        return Err(AppError::Validation("Reward description is required".into()));
    }
    match body.goal_type {
        GoalType::Points => {
            if body.target_points.map(|t| t <= 0).unwrap_or(true) {
                return Err(AppError::Validation(
                    "A points goal needs a positive target".into(),
                ));
            }
        }
        GoalType::ProjectCompletion => {
            if body
                .project_name
                .as_deref()
                .map(|p| p.trim().is_empty())
                .unwrap_or(true)
            {
                return Err(AppError::Validation(
                    "A project goal needs a project name".into(),
                ));
            }
        }
    }

    let mut conn = state.db.acquire().await?;
    let goal = sqlx::query_as::<_, Goal>(
        r#"
        INSERT INTO goals (goal_type, target_points, project_name, reward_description, deadline, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        RETURNING *
        "#,
    )
    .bind(body.goal_type)
    .bind(body.target_points)
    .bind(&body.project_name)
    .bind(body.reward_description.trim())
    .bind(body.deadline)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    // A goal created below the current score achieves immediately.
    let settings = Settings::load(&mut conn).await?;
    let today = dates::effective_for(&settings, Local::now().naive_local())?;
    scoring::check_goals(&mut conn, today).await?;

    let goal = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE id = ?1")
        .bind(goal.id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(Json(goal))
}

pub async fn update_goal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateGoalRequest>,
) -> AppResult<Json<Goal>> {
    let existing = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE id = ?1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Goal {id} not found")))?;

    if body.reward_claimed == Some(true) && !existing.achieved {
        return Err(AppError::Validation(
            "Cannot claim a reward before the goal is achieved".into(),
        ));
    }

    let goal = sqlx::query_as::<_, Goal>(
        r#"
        UPDATE goals SET
            target_points = COALESCE(?2, target_points),
            project_name = COALESCE(?3, project_name),
            reward_description = COALESCE(?4, reward_description),
            deadline = COALESCE(?5, deadline),
            reward_claimed = COALESCE(?6, reward_claimed)
        WHERE id = ?1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(body.target_points)
    .bind(&body.project_name)
    .bind(&body.reward_description)
    .bind(body.deadline)
    .bind(body.reward_claimed)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(goal))
}

pub async fn delete_goal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM goals WHERE id = ?1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Goal {id} not found")));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
