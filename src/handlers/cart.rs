use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::cart_item;
use crate::errors::ApiError;
use crate::handlers::common::ValidatedJson;
use crate::services::cart::AddCartLineInput;
use crate::services::checkout::DraftOrder;
use crate::{ApiResponse, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub lines: Vec<cart_item::Model>,
    pub item_count: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateCartLineRequest {
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "Get cart",
    responses((status = 200, description = "Cart lines in the order they were added", body = ApiResponse<CartView>)),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CartView>>, ApiError> {
    let lines = state.services.cart.list_lines(user.user_id).await?;
    let item_count = lines.iter().map(|l| i64::from(l.quantity)).sum();
    Ok(Json(ApiResponse::success(CartView { lines, item_count })))
}

#[utoipa::path(
    get,
    path = "/api/v1/cart/preview",
    summary = "Price the cart",
    description = "Prices the cart at current catalog prices without placing an order.",
    responses(
        (status = 200, description = "Priced snapshot", body = ApiResponse<DraftOrder>),
        (status = 400, description = "Cart is empty", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn preview_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<DraftOrder>>, ApiError> {
    let draft = state.services.checkout.materialize(user.user_id).await?;
    Ok(Json(ApiResponse::success(draft)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart",
    summary = "Add to cart",
    description = "Adds a configured product. An identical configuration already in the cart has its quantity increased.",
    request_body = AddCartLineInput,
    responses(
        (status = 201, description = "Saved line", body = ApiResponse<cart_item::Model>),
        (status = 404, description = "Unknown product, metal, purity or stone", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(input): ValidatedJson<AddCartLineInput>,
) -> Result<(StatusCode, Json<ApiResponse<cart_item::Model>>), ApiError> {
    let line = state.services.cart.add_line(user.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(line))))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/{id}",
    summary = "Change quantity",
    params(("id" = Uuid, Path, description = "Cart line id")),
    request_body = UpdateCartLineRequest,
    responses((status = 200, description = "Updated line", body = ApiResponse<cart_item::Model>)),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn update_cart_line(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateCartLineRequest>,
) -> Result<Json<ApiResponse<cart_item::Model>>, ApiError> {
    let line = state
        .services
        .cart
        .update_quantity(user.user_id, id, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(line)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/{id}",
    summary = "Remove line",
    params(("id" = Uuid, Path, description = "Cart line id")),
    responses(
        (status = 200, description = "Removed", body = ApiResponse<Uuid>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn remove_cart_line(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Uuid>>, ApiError> {
    state.services.cart.remove_line(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(id)))
}
