use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod core;
mod db;
mod error;
mod handlers;
mod models;

use config::Config;
use crate::core::scheduler::{self, SharedStatus};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub scheduler: SharedStatus,
}

fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz));

    let protected_routes = Router::new()
        // Items
        .route("/api/items", get(handlers::items::list_items))
        .route("/api/items", post(handlers::items::create_item))
        .route("/api/items/today-habits", get(handlers::items::today_habits))
        .route("/api/items/stop", post(handlers::items::stop_item))
        .route("/api/items/complete", post(handlers::items::complete_item))
        .route("/api/items/:id", get(handlers::items::get_item))
        .route("/api/items/:id", put(handlers::items::update_item))
        .route("/api/items/:id", delete(handlers::items::delete_item))
        .route("/api/items/:id/start", post(handlers::items::start_item))
        // Planner
        .route("/api/roll", post(handlers::planner::roll))
        .route("/api/roll/can", get(handlers::planner::can_roll))
        // Scoring
        .route("/api/points", get(handlers::scoring::current_points))
        .route("/api/points/history", get(handlers::scoring::history))
        .route("/api/points/projection", get(handlers::scoring::projection))
        // Goals
        .route("/api/goals", get(handlers::goals::list_goals))
        .route("/api/goals", post(handlers::goals::create_goal))
        .route("/api/goals/:id", put(handlers::goals::update_goal))
        .route("/api/goals/:id", delete(handlers::goals::delete_goal))
        // Rest days
        .route("/api/rest-days", get(handlers::rest_days::list_rest_days))
        .route("/api/rest-days", post(handlers::rest_days::create_rest_day))
        .route("/api/rest-days/:date", delete(handlers::rest_days::delete_rest_day))
        // Operations
        .route("/api/backups", get(handlers::backups::list_backups))
        .route("/api/backups", post(handlers::backups::create_backup))
        .route("/api/backups/:id", delete(handlers::backups::delete_backup))
        .route("/api/backups/:id/download", get(handlers::backups::download_backup))
        .route("/api/scheduler/status", get(handlers::scheduler::scheduler_status))
        .route("/api/settings", get(handlers::settings::get_settings))
        .route("/api/settings", put(handlers::settings::update_settings))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_api_key,
        ));

    let cors = match state.config.frontend_url.parse::<axum::http::HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-api-key"),
            ]),
        Err(_) => CorsLayer::new(),
    };

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "momentum_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    let db = db::create_pool(&config.database_path).await;
    db::run_migrations(&db)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    {
        let mut conn = db.acquire().await.expect("Failed to acquire connection");
        let today = chrono::Local::now().date_naive();
        models::settings::Settings::ensure(&mut conn, today)
            .await
            .expect("Failed to seed settings");
    }

    let status = scheduler::shared_status();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle =
        scheduler::spawn(db.clone(), config.clone(), status.clone(), shutdown_rx);

    let state = AppState {
        db,
        config: config.clone(),
        scheduler: status,
    };
    let app = build_router(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await
    .unwrap();

    // Signal the ticker and let any in-flight job finish before exit.
    shutdown_tx.send(true).ok();
    scheduler_handle.await.ok();
    tracing::info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_config(api_key: Option<&str>) -> Config {
        Config {
            database_path: ":memory:".into(),
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: "http://localhost:3000".into(),
            backup_dir: "backups".into(),
            api_key: api_key.map(String::from),
        }
    }

    async fn test_app(api_key: Option<&str>) -> Router {
        let state = AppState {
            db: db::pool::test_pool().await,
            config: Arc::new(test_config(api_key)),
            scheduler: scheduler::shared_status(),
        };
        build_router(state)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app(None).await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_key_gate() {
        let app = test_app(Some("sekrit")).await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/items").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/items")
                    .header("x-api-key", "sekrit")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_start_complete_flow() {
        let app = test_app(None).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/items",
                serde_json::json!({ "description": "write report", "priority": 6 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let item = json_body(response).await;
        let id = item["id"].as_i64().unwrap();
        assert_eq!(item["status"], "pending");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/items/{id}/start"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "active");

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/items/complete", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = json_body(response).await;
        assert_eq!(outcome["item"]["status"], "completed");
        // Instant completion: full time quality, but the focus factor halves it
        assert_eq!(outcome["points"], 5);

        let response = app
            .oneshot(Request::builder().uri("/api/points").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let summary = json_body(response).await;
        assert_eq!(summary["total_points"], 5);
    }

    #[tokio::test]
    async fn test_roll_endpoint_idempotent() {
        let app = test_app(None).await;

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/roll", serde_json::json!({ "mood": 3 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request("POST", "/api/roll", serde_json::json!({ "mood": 3 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_validation_error_shape() {
        let app = test_app(None).await;
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/items",
                serde_json::json!({ "description": "", "priority": 99 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("Description"));
    }
}
