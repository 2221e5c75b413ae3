use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AdminUser, AuthUser};
use crate::entities::notification;
use crate::errors::ApiError;
use crate::handlers::coerce::{lenient_bool, lenient_string_map};
use crate::handlers::common::ValidatedJson;
use crate::services::notifications::{
    AudienceFilter, DeliveryReport, InboxPage, NotificationContent, DEFAULT_KIND,
};
use crate::{ApiResponse, AppState};

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SendNotificationRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
    #[serde(default)]
    #[validate(url)]
    pub image: Option<String>,
    #[serde(rename = "type", default = "default_kind")]
    #[validate(length(min = 1, max = 50))]
    pub kind: String,
    /// Object or JSON-encoded object; values are sent as strings
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub data: BTreeMap<String, String>,
}

impl From<SendNotificationRequest> for NotificationContent {
    fn from(request: SendNotificationRequest) -> Self {
        Self {
            title: request.title,
            body: request.body,
            image: request.image,
            kind: request.kind,
            data: request.data,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct BroadcastRequest {
    #[serde(flatten)]
    #[validate]
    pub notification: SendNotificationRequest,
    #[serde(default)]
    pub filter: AudienceFilter,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RegisterTokenRequest {
    #[validate(length(min = 1, max = 4096))]
    pub token: String,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RemoveTokenRequest {
    #[validate(length(min = 1, max = 4096))]
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisteredToken {
    pub token: String,
    pub platform: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResult {
    pub count: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct InboxQuery {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
    /// Accepts true/false, 1/0, yes/no
    #[serde(default, deserialize_with = "lenient_bool")]
    pub unread_only: bool,
}

fn report_response(report: DeliveryReport) -> Json<ApiResponse<DeliveryReport>> {
    Json(ApiResponse::outcome(
        report.success,
        report.message.clone(),
        report,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/send-to-user/{user_id}",
    summary = "Notify one user",
    description = "Admin only. Stores an inbox entry and pushes to the user's device.",
    params(("user_id" = Uuid, Path, description = "Recipient")),
    request_body = SendNotificationRequest,
    responses(
        (status = 200, description = "Aggregate delivery counts", body = ApiResponse<DeliveryReport>),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn send_to_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(user_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<SendNotificationRequest>,
) -> Result<Json<ApiResponse<DeliveryReport>>, ApiError> {
    let content = NotificationContent::from(request);
    let report = state
        .services
        .notifications
        .notify_user(user_id, &content)
        .await?;
    Ok(report_response(report))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/send-to-all",
    summary = "Broadcast",
    description = "Admin only. Every matching user with a registered device gets an inbox entry and a push.",
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Aggregate delivery counts", body = ApiResponse<DeliveryReport>),
    ),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn send_to_all(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    ValidatedJson(request): ValidatedJson<BroadcastRequest>,
) -> Result<Json<ApiResponse<DeliveryReport>>, ApiError> {
    let content = NotificationContent::from(request.notification);
    let report = state
        .services
        .notifications
        .send_to_all_users(&content, &request.filter)
        .await?;
    Ok(report_response(report))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/token",
    summary = "Register device token",
    request_body = RegisterTokenRequest,
    responses((status = 201, description = "Token registered", body = ApiResponse<RegisteredToken>)),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn register_token(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<RegisterTokenRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RegisteredToken>>), ApiError> {
    let row = state
        .services
        .notifications
        .register_token(user.user_id, &request.token, request.platform)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(RegisteredToken {
            token: row.token,
            platform: row.platform,
            created_at: row.created_at,
        })),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/notifications/token",
    summary = "Remove device token",
    request_body = RemoveTokenRequest,
    responses((status = 200, description = "Number of tokens removed", body = ApiResponse<CountResult>)),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn remove_token(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<RemoveTokenRequest>,
) -> Result<Json<ApiResponse<CountResult>>, ApiError> {
    let removed = state
        .services
        .notifications
        .remove_token(user.user_id, &request.token)
        .await?;
    Ok(Json(ApiResponse::success(CountResult {
        count: u64::from(removed),
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    summary = "Inbox",
    params(InboxQuery),
    responses((status = 200, description = "Newest first, with unread count", body = ApiResponse<InboxPage>)),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<InboxQuery>,
) -> Result<Json<ApiResponse<InboxPage>>, ApiError> {
    let (page, per_page) = crate::handlers::common::PaginationParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page,
    }
    .resolve(&state.config);
    let inbox = state
        .services
        .notifications
        .list_for_user(user.user_id, page, per_page, query.unread_only)
        .await?;
    Ok(Json(ApiResponse::success(inbox)))
}

#[utoipa::path(
    put,
    path = "/api/v1/notifications/{id}/read",
    summary = "Mark read",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Updated entry", body = ApiResponse<notification::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<notification::Model>>, ApiError> {
    let record = state
        .services
        .notifications
        .mark_read(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

#[utoipa::path(
    put,
    path = "/api/v1/notifications/read-all",
    summary = "Mark all read",
    responses((status = 200, description = "Number of entries updated", body = ApiResponse<CountResult>)),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CountResult>>, ApiError> {
    let count = state
        .services
        .notifications
        .mark_all_read(user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(CountResult { count })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/notifications/{id}",
    summary = "Delete inbox entry",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Deleted", body = ApiResponse<CountResult>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "notifications"
)]
pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CountResult>>, ApiError> {
    state
        .services
        .notifications
        .delete_record(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(CountResult { count: 1 })))
}
