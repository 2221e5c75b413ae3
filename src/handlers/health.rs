use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use utoipa::ToSchema;

use crate::AppState;

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
    /// Not configured or failed to initialise; the API runs without it
    Disabled,
}

/// Individual component health details
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn integration(enabled: bool, name: &str) -> Self {
        if enabled {
            Self {
                status: ComponentStatus::Up,
                message: format!("{} configured", name),
                latency_ms: None,
            }
        } else {
            Self {
                status: ComponentStatus::Disabled,
                message: format!("{} not configured", name),
                latency_ms: None,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthDetails {
    pub database: ComponentHealth,
    pub payments: ComponentHealth,
    pub push: ComponentHealth,
    pub email: ComponentHealth,
}

/// Full health check response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `up` when the database answers; integrations never take the API down
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub details: HealthDetails,
    pub response_time_ms: u64,
}

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "Liveness",
    responses((status = 200, description = "Process is alive")),
    tag = "health"
)]
pub async fn liveness_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_HASH").unwrap_or("unknown"),
        "built": option_env!("BUILD_TIME").unwrap_or("unknown"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[utoipa::path(
    get,
    path = "/status",
    summary = "Dependency status",
    responses(
        (status = 200, description = "Database reachable", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn status_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();

    let db_result = crate::db::check_connection(&state.db).await;
    let db_latency = start.elapsed().as_millis() as u64;
    let db_up = db_result.is_ok();

    let database = ComponentHealth {
        status: if db_up {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        message: db_result.map_or_else(
            |e| format!("Connection failed: {}", e),
            |_| "Connection successful".to_string(),
        ),
        latency_ms: Some(db_latency),
    };

    let details = HealthDetails {
        database,
        payments: ComponentHealth::integration(state.services.orders.payments_enabled(), "PayPal"),
        push: ComponentHealth::integration(state.services.notifications.push_enabled(), "FCM"),
        email: ComponentHealth::integration(state.services.orders.email_enabled(), "SMTP"),
    };

    let status_code = if db_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if db_up {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: get_uptime_secs(),
        details,
        response_time_ms: start.elapsed().as_millis() as u64,
    };

    (status_code, Json(response))
}
