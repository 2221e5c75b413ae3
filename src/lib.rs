//! Storefront API Library
//!
//! Jewelry storefront core: catalog pricing, carts, checkout with currency
//! conversion, PayPal settlement and push notification fanout.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod push;
pub mod services;
pub mod tracing;

use axum::{
    extract::FromRef,
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use utoipa::ToSchema;

use crate::auth::{AuthConfig, AuthService};
use crate::services::factory::{Providers, ServiceContainer, ServiceFactory};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub auth: Arc<AuthService>,
    pub services: ServiceContainer,
}

impl AppState {
    /// Wires services over a connected pool and whatever providers initialised
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig, providers: Providers) -> Self {
        let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&config)));
        let factory = ServiceFactory::new(db.clone(), config.clone(), providers);
        let services = ServiceContainer::new(&factory);
        Self {
            db,
            config,
            auth,
            services,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }

    /// Carries a payload whether or not the operation succeeded, e.g. a
    /// delivery report or an order whose payment was declined
    pub fn outcome(success: bool, message: String, data: T) -> Self {
        Self {
            success,
            data: Some(data),
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ApiError>;

pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route(
            "/orders/capture-paypal",
            post(handlers::orders::capture_paypal),
        )
        .route("/orders/my-orders", get(handlers::orders::list_my_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        );

    let notifications = Router::new()
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/notifications/send-to-user/:user_id",
            post(handlers::notifications::send_to_user),
        )
        .route(
            "/notifications/send-to-all",
            post(handlers::notifications::send_to_all),
        )
        .route(
            "/notifications/token",
            post(handlers::notifications::register_token)
                .delete(handlers::notifications::remove_token),
        )
        .route(
            "/notifications/read-all",
            put(handlers::notifications::mark_all_read),
        )
        .route(
            "/notifications/:id/read",
            put(handlers::notifications::mark_read),
        )
        .route(
            "/notifications/:id",
            axum::routing::delete(handlers::notifications::delete_notification),
        );

    let cart = Router::new()
        .route(
            "/cart",
            get(handlers::cart::get_cart).post(handlers::cart::add_to_cart),
        )
        .route("/cart/preview", get(handlers::cart::preview_cart))
        .route(
            "/cart/:id",
            put(handlers::cart::update_cart_line).delete(handlers::cart::remove_cart_line),
        );

    Router::new().merge(orders).merge(notifications).merge(cart)
}

/// Full application router without CORS, which depends on deployment config
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::liveness_check))
        .route("/status", get(handlers::health::status_check))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}
