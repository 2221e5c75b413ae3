mod common;

use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{order_request, response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use storefront_api::{
    entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::orders::{CaptureResult, CreateOrderRequest},
};

fn request(value: serde_json::Value) -> CreateOrderRequest {
    serde_json::from_value(value).expect("valid order request")
}

fn paypal_in_inr(rate: &str) -> CreateOrderRequest {
    let mut body = order_request("paypal");
    body["currency"] = json!("INR");
    body["exchange_rate"] = json!(rate);
    request(body)
}

async fn order_count(app: &TestApp) -> u64 {
    order::Entity::find()
        .count(&*app.state.db)
        .await
        .expect("count orders")
}

#[tokio::test]
async fn cash_on_delivery_prices_snapshot_and_clears_cart() {
    let app = TestApp::new().await;
    let customer = app.customer.id;
    app.add_ring_to_cart(customer, 2).await;

    let placement = app
        .state
        .services
        .orders
        .create_order(customer, request(order_request("cash_on_delivery")))
        .await
        .expect("direct order");

    let order = placement.order;
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].unit_price, dec!(950));
    assert_eq!(order.items[0].total_price, dec!(1900));
    assert_eq!(order.items[0].purity_level, "18K");
    assert_eq!(order.subtotal, dec!(1900));
    assert_eq!(order.total, dec!(1900));
    assert_eq!(order.currency, "INR");
    assert_eq!(order.exchange_rate, None);
    assert_eq!(order.payment_method, PaymentMethod::CashOnDelivery);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.billing_address, order.shipping_address);
    assert!(placement.approval_url.is_none());

    let cart = app.state.services.cart.list_lines(customer).await.unwrap();
    assert!(cart.is_empty());
    assert!(app.payments.created.lock().unwrap().is_empty());
    assert_eq!(app.wait_for_emails(1).await, 1);
}

#[tokio::test]
async fn checkout_of_empty_cart_is_rejected() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .orders
        .create_order(app.customer.id, request(order_request("bank_transfer")))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::EmptyCart);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn unsupported_currency_without_rate_is_rejected_before_the_gateway() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;

    let err = app
        .state
        .services
        .orders
        .create_order(app.customer.id, request(order_request("paypal")))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(app.payments.created.lock().unwrap().is_empty());
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn unsupported_currency_is_settled_in_usd_at_the_given_rate() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 2).await;

    let placement = app
        .state
        .services
        .orders
        .create_order(app.customer.id, paypal_in_inr("0.012"))
        .await
        .expect("gateway order");

    let order = placement.order;
    assert_eq!(order.currency, "USD");
    assert_eq!(order.exchange_rate, Some(dec!(0.012)));
    assert_eq!(order.items[0].unit_price, dec!(11.40));
    assert_eq!(order.total, dec!(22.80));
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.external_payment_order_id.as_deref(), Some("PAY-1"));
    assert_eq!(
        placement.approval_url.as_deref(),
        Some("https://paypal.test/checkoutnow?token=PAY-1")
    );
    assert!(!placement.exchange_rate_defaulted);

    let created = app.payments.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].currency, "USD");
    assert_eq!(created[0].total, dec!(22.80));
    assert_eq!(created[0].reference_id, order.order_number);

    // the cart survives until the payment is captured
    let cart = app.state.services.cart.list_lines(app.customer.id).await.unwrap();
    assert_eq!(cart.len(), 1);
}

#[tokio::test]
async fn foreign_currency_without_rate_defaults_to_one() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;

    let mut body = order_request("paypal");
    body["currency"] = json!("eur");
    let placement = app
        .state
        .services
        .orders
        .create_order(app.customer.id, request(body))
        .await
        .expect("gateway order");

    assert!(placement.exchange_rate_defaulted);
    assert_eq!(placement.order.currency, "EUR");
    assert_eq!(placement.order.total, dec!(950));
    assert_eq!(placement.order.exchange_rate, None);
}

#[tokio::test]
async fn gateway_failure_stores_nothing() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;
    app.payments.fail_create.store(true, Ordering::SeqCst);

    let err = app
        .state
        .services
        .orders
        .create_order(app.customer.id, paypal_in_inr("0.012"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PaymentProviderError(_));
    assert_eq!(order_count(&app).await, 0);
    let cart = app.state.services.cart.list_lines(app.customer.id).await.unwrap();
    assert_eq!(cart.len(), 1);
}

#[tokio::test]
async fn missing_approval_link_stores_nothing() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;
    app.payments.omit_approval_link.store(true, Ordering::SeqCst);

    let err = app
        .state
        .services
        .orders
        .create_order(app.customer.id, paypal_in_inr("0.012"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PaymentProviderError(_));
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn gateway_checkout_without_configured_provider_fails() {
    let app = TestApp::builder().without_payments().build().await;
    app.add_ring_to_cart(app.customer.id, 1).await;

    let err = app
        .state
        .services
        .orders
        .create_order(app.customer.id, paypal_in_inr("0.012"))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PaymentProviderError(_));
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn capture_settles_order_clears_cart_and_notifies_once() {
    let app = TestApp::new().await;
    let customer = app.customer.id;
    app.add_ring_to_cart(customer, 2).await;
    app.register_device(customer, "device-a").await;

    let placement = app
        .state
        .services
        .orders
        .create_order(customer, paypal_in_inr("0.012"))
        .await
        .unwrap();
    let provider_id = placement.order.external_payment_order_id.clone().unwrap();

    let result = app
        .state
        .services
        .orders
        .capture_payment(customer, &provider_id)
        .await
        .expect("capture");

    let order = assert_matches!(result, CaptureResult::Completed(order) => order);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(
        order.external_transaction_id.as_deref(),
        Some("TXN-PAY-1")
    );

    let cart = app.state.services.cart.list_lines(customer).await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(app.wait_for_emails(1).await, 1);

    let inbox = app
        .state
        .services
        .notifications
        .list_for_user(customer, 1, 20, false)
        .await
        .unwrap();
    assert_eq!(inbox.total, 1);
    assert_eq!(inbox.notifications[0].kind, "order_update");
    assert_eq!(app.push.delivered_tokens(), vec!["device-a".to_string()]);

    // a replayed capture finds nothing pending and never reaches the gateway
    let err = app
        .state
        .services
        .orders
        .capture_payment(customer, &provider_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OrderNotFound(_));
    assert_eq!(app.payments.captures.load(Ordering::SeqCst), 1);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(app.mailer.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn capture_of_someone_elses_payment_is_not_found() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;
    let placement = app
        .state
        .services
        .orders
        .create_order(app.customer.id, paypal_in_inr("0.012"))
        .await
        .unwrap();
    let provider_id = placement.order.external_payment_order_id.unwrap();

    let err = app
        .state
        .services
        .orders
        .capture_payment(app.admin.id, &provider_id)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::OrderNotFound(_));
    assert_eq!(app.payments.captures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn declined_capture_marks_order_failed_over_http() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;
    app.payments.decline_capture.store(true, Ordering::SeqCst);
    let token = app.customer_token();

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "shipping_address": common::shipping_address(),
                "phone": "+91 98200 00000",
                "payment_method": "paypal",
                "currency": "INR",
                "exchange_rate": 0.012
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await;
    assert_eq!(created["success"], true);
    let provider_id = created["data"]["order"]["external_payment_order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders/capture-paypal",
            Some(json!({ "orderID": provider_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["payment_status"], "failed");

    let cart = app.state.services.cart.list_lines(app.customer.id).await.unwrap();
    assert_eq!(cart.len(), 1);

    // the failed order is no longer capturable
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders/capture-paypal",
            Some(json!({ "provider_order_id": provider_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn orders_are_visible_to_owner_and_admin_only() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;
    let placement = app
        .state
        .services
        .orders
        .create_order(app.customer.id, request(order_request("bank_transfer")))
        .await
        .unwrap();
    let path = format!("/api/v1/orders/{}", placement.order.id);

    let stranger = app.add_user("Eve Stranger").await;
    let response = app
        .request(Method::GET, &path, None, Some(&app.token_for(&stranger)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::GET, &path, None, Some(&app.customer_token()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::GET, &path, None, Some(&app.admin_token()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["order_number"], placement.order.order_number);

    let response = app
        .request(
            Method::GET,
            "/api/v1/orders/my-orders",
            None,
            Some(&app.customer_token()),
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn admin_status_updates_move_forward_and_notify_owner() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;
    let placement = app
        .state
        .services
        .orders
        .create_order(app.customer.id, request(order_request("cash_on_delivery")))
        .await
        .unwrap();
    let path = format!("/api/v1/orders/{}/status", placement.order.id);

    let response = app
        .request(
            Method::PUT,
            &path,
            Some(json!({ "status": "shipped" })),
            Some(&app.customer_token()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(
            Method::PUT,
            &path,
            Some(json!({ "status": "shipped" })),
            Some(&app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "shipped");

    let response = app
        .request(
            Method::PUT,
            &path,
            Some(json!({ "status": "processing" })),
            Some(&app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let inbox = app
        .state
        .services
        .notifications
        .list_for_user(app.customer.id, 1, 20, true)
        .await
        .unwrap();
    assert_eq!(inbox.unread_count, 1);
    assert_eq!(inbox.notifications[0].data["status"], "shipped");

    let response = app
        .request(
            Method::GET,
            "/api/v1/orders?status=shipped",
            None,
            Some(&app.admin_token()),
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn concurrent_captures_reach_the_gateway_once() {
    let app = TestApp::new().await;
    let customer = app.customer.id;
    app.add_ring_to_cart(customer, 1).await;
    let placement = app
        .state
        .services
        .orders
        .create_order(customer, paypal_in_inr("0.012"))
        .await
        .unwrap();
    let provider_id = placement.order.external_payment_order_id.unwrap();
    app.payments.capture_delay_ms.store(300, Ordering::SeqCst);

    let orders = &app.state.services.orders;
    let (first, second) = tokio::join!(
        orders.capture_payment(customer, &provider_id),
        orders.capture_payment(customer, &provider_id),
    );

    assert_eq!(app.payments.captures.load(Ordering::SeqCst), 1);
    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one capture to win, got {:?}", other),
    };
    let order = assert_matches!(won, CaptureResult::Completed(order) => order);
    assert_matches!(lost, ServiceError::OrderNotFound(_));

    let stored = order::Entity::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.status, OrderStatus::Processing);
    assert!(app.state.services.cart.list_lines(customer).await.unwrap().is_empty());
}

#[tokio::test]
async fn already_captured_answer_never_marks_the_order_failed() {
    let app = TestApp::new().await;
    let customer = app.customer.id;
    app.add_ring_to_cart(customer, 1).await;
    let placement = app
        .state
        .services
        .orders
        .create_order(customer, paypal_in_inr("0.012"))
        .await
        .unwrap();
    let provider_id = placement.order.external_payment_order_id.unwrap();
    app.payments.mark_captured(&provider_id);

    let err = app
        .state
        .services
        .orders
        .capture_payment(customer, &provider_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentProviderError(_));

    let stored = order::Entity::find_by_id(placement.order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.capture_started_at.is_some());
}

#[tokio::test]
async fn capture_completes_when_confirmation_email_fails() {
    let app = TestApp::new().await;
    let customer = app.customer.id;
    app.add_ring_to_cart(customer, 1).await;
    app.mailer.fail.store(true, Ordering::SeqCst);
    let placement = app
        .state
        .services
        .orders
        .create_order(customer, paypal_in_inr("0.012"))
        .await
        .unwrap();
    let provider_id = placement.order.external_payment_order_id.unwrap();

    let result = app
        .state
        .services
        .orders
        .capture_payment(customer, &provider_id)
        .await
        .expect("capture succeeds without email");

    let order = assert_matches!(result, CaptureResult::Completed(order) => order);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert!(app.state.services.cart.list_lines(customer).await.unwrap().is_empty());
    assert_eq!(app.wait_for_email_attempts(1).await, 1);
    assert!(app.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unpaid_gateway_order_cannot_be_fulfilled() {
    let app = TestApp::new().await;
    let customer = app.customer.id;
    app.add_ring_to_cart(customer, 1).await;
    let placement = app
        .state
        .services
        .orders
        .create_order(customer, paypal_in_inr("0.012"))
        .await
        .unwrap();
    let provider_id = placement.order.external_payment_order_id.clone().unwrap();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", placement.order.id),
            Some(json!({ "status": "shipped" })),
            Some(&app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let err = app
        .state
        .services
        .orders
        .update_status(placement.order.id, OrderStatus::Processing)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));

    // the buyer can still settle it afterwards
    let result = app
        .state
        .services
        .orders
        .capture_payment(customer, &provider_id)
        .await
        .unwrap();
    assert_matches!(result, CaptureResult::Completed(_));
}

#[tokio::test]
async fn unpaid_gateway_order_can_be_cancelled() {
    let app = TestApp::new().await;
    app.add_ring_to_cart(app.customer.id, 1).await;
    let placement = app
        .state
        .services
        .orders
        .create_order(app.customer.id, paypal_in_inr("0.012"))
        .await
        .unwrap();

    let order = app
        .state
        .services
        .orders
        .update_status(placement.order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}
