use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser};
use crate::entities::order::OrderStatus;
use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{PaginationParams, ValidatedJson};
use crate::services::orders::{
    CapturePaymentRequest, CaptureResult, CreateOrderRequest, OrderPage, OrderPlacement,
    OrderView,
};
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
    /// Only orders in this fulfillment status
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize, ToSchema, validator::Validate)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Place an order from the cart. PayPal orders return an approval URL and stay pending until captured; other methods settle immediately and empty the cart.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderPlacement>),
        (status = 400, description = "Invalid request or empty cart", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or catalog reference not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderPlacement>>), ApiError> {
    let placement = state
        .services
        .orders
        .create_order(user.user_id, request)
        .await?;

    let mut response = ApiResponse::success(placement);
    response.message = Some("Order created".to_string());
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/capture-paypal",
    summary = "Capture PayPal payment",
    description = "Finalize an approved PayPal payment. A declined capture answers 402 with the order in its failed state.",
    request_body = CapturePaymentRequest,
    responses(
        (status = 200, description = "Payment captured", body = ApiResponse<OrderView>),
        (status = 402, description = "Payment failed; order marked failed", body = ApiResponse<OrderView>),
        (status = 404, description = "No pending order for this payment", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn capture_paypal(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<CapturePaymentRequest>,
) -> Result<Response, ApiError> {
    let result = state
        .services
        .orders
        .capture_payment(user.user_id, &request.provider_order_id)
        .await?;

    Ok(match result {
        CaptureResult::Completed(order) => {
            let mut response = ApiResponse::success(order);
            response.message = Some("Payment completed".to_string());
            (StatusCode::OK, Json(response)).into_response()
        }
        CaptureResult::Failed { order, reason } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(ApiResponse::outcome(
                false,
                format!("Payment failed: {}. Please try again.", reason),
                order,
            )),
        )
            .into_response(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/my-orders",
    summary = "List my orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders of the caller, newest first", body = ApiResponse<OrderPage>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<OrderPage>>, ApiError> {
    let (page, per_page) = params.resolve(&state.config);
    let orders = state
        .services
        .orders
        .list_my_orders(user.user_id, page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderView>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    let order = state.services.orders.get_order(&user, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Admin only",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<OrderPage>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<OrderPage>>, ApiError> {
    let (page, per_page) = PaginationParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page,
    }
    .resolve(&state.config);
    let orders = state
        .services
        .orders
        .list_orders(query.status, page, per_page)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    description = "Admin only. Status only moves forward; cancelling is allowed until the order ships. The owner is notified.",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderView>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    tracing::info!(admin = %admin.user_id, order_id = %id, status = %request.status, "admin status change");
    let order = state
        .services
        .orders
        .update_status(id, request.status)
        .await
        .map_err(|e| match e {
            ServiceError::NotFound(_) => ServiceError::OrderNotFound(id.to_string()),
            other => other,
        })?;
    Ok(Json(ApiResponse::success(order)))
}
