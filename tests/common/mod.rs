#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db::{self, DbConfig},
    email::{EmailError, EmailMessage, EmailSender},
    entities::{cart_item, device_token, metal, product, stone_type, user},
    payments::{
        CaptureOutcome, PaymentError, PaymentOrderRequest, PaymentProvider, ProviderOrder,
        ORDER_ALREADY_CAPTURED,
    },
    push::{MulticastResult, PushError, PushErrorCode, PushMessage, PushProvider, TokenResult},
    services::factory::Providers,
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Scripted stand-in for the PayPal gateway
#[derive(Default)]
pub struct FakePayments {
    pub created: Mutex<Vec<PaymentOrderRequest>>,
    pub captures: AtomicUsize,
    pub fail_create: AtomicBool,
    pub omit_approval_link: AtomicBool,
    pub decline_capture: AtomicBool,
    /// Milliseconds each capture call waits before answering
    pub capture_delay_ms: AtomicU64,
    /// Gateway-side orders whose funds were taken
    pub captured: Mutex<HashSet<String>>,
}

impl FakePayments {
    /// Pretends an earlier request already captured the funds
    pub fn mark_captured(&self, provider_order_id: &str) {
        self.captured
            .lock()
            .unwrap()
            .insert(provider_order_id.to_string());
    }
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn create_order(
        &self,
        request: &PaymentOrderRequest,
    ) -> Result<ProviderOrder, PaymentError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::Rejected {
                status: 422,
                message: "CURRENCY_NOT_SUPPORTED".to_string(),
            });
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let id = format!("PAY-{}", created.len());
        let approval_url = if self.omit_approval_link.load(Ordering::SeqCst) {
            None
        } else {
            Some(format!("https://paypal.test/checkoutnow?token={}", id))
        };
        Ok(ProviderOrder {
            id,
            status: "CREATED".to_string(),
            approval_url,
        })
    }

    async fn capture_order(&self, provider_order_id: &str) -> Result<CaptureOutcome, PaymentError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let first_capture = self
            .captured
            .lock()
            .unwrap()
            .insert(provider_order_id.to_string());
        let delay = self.capture_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !first_capture {
            return Err(PaymentError::Rejected {
                status: 422,
                message: ORDER_ALREADY_CAPTURED.to_string(),
            });
        }
        let status = if self.decline_capture.load(Ordering::SeqCst) {
            "DECLINED"
        } else {
            "COMPLETED"
        };
        Ok(CaptureOutcome {
            provider_order_id: provider_order_id.to_string(),
            status: status.to_string(),
            transaction_id: Some(format!("TXN-{}", provider_order_id)),
            card: None,
        })
    }
}

/// Push provider that delivers to every token except the ones marked dead
#[derive(Default)]
pub struct FakePush {
    pub batches: Mutex<Vec<Vec<String>>>,
    pub singles: Mutex<Vec<String>>,
    pub unregistered: Mutex<HashSet<String>>,
    pub messages: Mutex<Vec<PushMessage>>,
}

impl FakePush {
    pub fn mark_unregistered(&self, token: &str) {
        self.unregistered.lock().unwrap().insert(token.to_string());
    }

    pub fn delivered_tokens(&self) -> Vec<String> {
        let dead = self.unregistered.lock().unwrap();
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|t| !dead.contains(*t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PushProvider for FakePush {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String, PushError> {
        self.singles.lock().unwrap().push(token.to_string());
        self.messages.lock().unwrap().push(message.clone());
        if self.unregistered.lock().unwrap().contains(token) {
            return Err(PushError::Rejected {
                code: PushErrorCode::Unregistered,
                message: "Requested entity was not found.".to_string(),
            });
        }
        Ok(format!("projects/test/messages/{}", token))
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<MulticastResult, PushError> {
        self.batches.lock().unwrap().push(tokens.to_vec());
        self.messages.lock().unwrap().push(message.clone());
        let dead = self.unregistered.lock().unwrap();
        let responses = tokens
            .iter()
            .map(|token| {
                if dead.contains(token) {
                    TokenResult::failed(token.clone(), PushErrorCode::Unregistered)
                } else {
                    TokenResult::delivered(token.clone(), format!("msg-{}", token))
                }
            })
            .collect();
        Ok(MulticastResult::from_responses(responses))
    }
}

#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub attempts: AtomicUsize,
    /// When set every send fails like an unreachable SMTP relay
    pub fail: AtomicBool,
}

#[async_trait]
impl EmailSender for FakeMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmailError::Transport("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Seeded catalog: one ring, 18K gold at 0.75 and a 200 diamond
pub struct Catalog {
    pub product_id: Uuid,
    pub metal_id: Uuid,
    pub stone_id: Uuid,
}

pub struct TestAppBuilder {
    config: AppConfig,
    with_push: bool,
    with_payments: bool,
}

impl TestAppBuilder {
    pub fn config(mut self, edit: impl FnOnce(&mut AppConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn without_push(mut self) -> Self {
        self.with_push = false;
        self
    }

    pub fn without_payments(mut self) -> Self {
        self.with_payments = false;
        self
    }

    pub async fn build(self) -> TestApp {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let payments = Arc::new(FakePayments::default());
        let push = Arc::new(FakePush::default());
        let mailer = Arc::new(FakeMailer::default());

        let providers = Providers {
            payments: self
                .with_payments
                .then(|| payments.clone() as Arc<dyn PaymentProvider>),
            push: self.with_push.then(|| push.clone() as Arc<dyn PushProvider>),
            email: Some(mailer.clone() as Arc<dyn EmailSender>),
        };

        let state = AppState::new(Arc::new(pool), self.config, providers);
        let router = storefront_api::app_router(state.clone());

        let customer = insert_user(&state, "Ada Customer", user::UserRole::Customer).await;
        let admin = insert_user(&state, "Root Admin", user::UserRole::Admin).await;
        let catalog = seed_catalog(&state).await;

        TestApp {
            router,
            state,
            payments,
            push,
            mailer,
            customer,
            admin,
            catalog,
        }
    }
}

/// Application over an in-memory SQLite database with fake integrations
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub payments: Arc<FakePayments>,
    pub push: Arc<FakePush>,
    pub mailer: Arc<FakeMailer>,
    pub customer: user::Model,
    pub admin: user::Model,
    pub catalog: Catalog,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        let mut config = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        config.provider_timeout_secs = 2;
        TestAppBuilder {
            config,
            with_push: true,
            with_payments: true,
        }
    }

    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        let roles = match user.role {
            user::UserRole::Admin => vec!["admin".to_string()],
            user::UserRole::Customer => vec!["customer".to_string()],
        };
        self.state
            .auth
            .issue_token(user.id, Some(user.email.clone()), roles)
            .expect("issue test token")
    }

    pub fn customer_token(&self) -> String {
        self.token_for(&self.customer)
    }

    pub fn admin_token(&self) -> String {
        self.token_for(&self.admin)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends raw bytes as a JSON body
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: &'static str,
        token: &str,
    ) -> axum::response::Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn add_ring_to_cart(&self, user_id: Uuid, quantity: i32) -> cart_item::Model {
        self.state
            .services
            .cart
            .add_line(
                user_id,
                storefront_api::services::cart::AddCartLineInput {
                    product_id: self.catalog.product_id,
                    metal_id: self.catalog.metal_id,
                    purity_karat: "18K".to_string(),
                    stone_id: Some(self.catalog.stone_id),
                    ring_size: Some("7".to_string()),
                    quantity,
                },
            )
            .await
            .expect("add ring to cart")
    }

    pub async fn add_user(&self, name: &str) -> user::Model {
        insert_user(&self.state, name, user::UserRole::Customer).await
    }

    pub async fn register_device(&self, user_id: Uuid, token: &str) -> device_token::Model {
        self.state
            .services
            .notifications
            .register_token(user_id, token, Some("android".to_string()))
            .await
            .expect("register device token")
    }

    /// Waits for spawned confirmation emails to land
    /// Waits until the background mailer has been called `expected` times
    pub async fn wait_for_email_attempts(&self, expected: usize) -> usize {
        for _ in 0..50 {
            let attempts = self.mailer.attempts.load(Ordering::SeqCst);
            if attempts >= expected {
                return attempts;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.mailer.attempts.load(Ordering::SeqCst)
    }

    pub async fn wait_for_emails(&self, expected: usize) -> usize {
        for _ in 0..50 {
            let sent = self.mailer.sent.lock().unwrap().len();
            if sent >= expected {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.mailer.sent.lock().unwrap().len()
    }
}

pub fn shipping_address() -> Value {
    json!({
        "full_name": "Ada Customer",
        "line1": "12 Jewel Street",
        "city": "Mumbai",
        "state": "MH",
        "postal_code": "400001",
        "country": "IN"
    })
}

pub fn order_request(payment_method: &str) -> Value {
    json!({
        "shipping_address": shipping_address(),
        "phone": "+91 98200 00000",
        "payment_method": payment_method
    })
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("response body is json")
}

async fn insert_user(state: &AppState, name: &str, role: user::UserRole) -> user::Model {
    let id = Uuid::new_v4();
    user::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        email: Set(format!("{}@example.com", id.simple())),
        role: Set(role),
        created_at: Set(Utc::now()),
    }
    .insert(&*state.db)
    .await
    .expect("insert user")
}

async fn seed_catalog(state: &AppState) -> Catalog {
    let db = &*state.db;
    let product = product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Solitaire Ring".to_string()),
        description: Set(Some("Classic four-prong setting".to_string())),
        images: Set(json!(["https://cdn.test/solitaire.jpg"])),
        base_price: Set(dec!(1000)),
        is_active: Set(true),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("insert product");

    let metal = metal::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Gold".to_string()),
        purity_levels: Set(json!([
            {"karat": "14K", "price_multiplier": "0.585"},
            {"karat": "18K", "price_multiplier": "0.75"}
        ])),
    }
    .insert(db)
    .await
    .expect("insert metal");

    let stone = stone_type::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Diamond".to_string()),
        price: Set(Decimal::from(200)),
    }
    .insert(db)
    .await
    .expect("insert stone");

    Catalog {
        product_id: product.id,
        metal_id: metal.id,
        stone_id: stone.id,
    }
}
