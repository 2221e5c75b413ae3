mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rstest::rstest;
use serde_json::json;

#[tokio::test]
async fn health_endpoints_answer_without_auth() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "up");

    let response = app.request(Method::GET, "/status", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["details"]["database"]["status"], "up");
    assert_eq!(body["details"]["payments"]["status"], "up");
}

#[tokio::test]
async fn status_reports_missing_integrations_as_disabled() {
    let app = TestApp::builder().without_push().build().await;

    let response = app.request(Method::GET, "/status", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["details"]["push"]["status"], "disabled");
}

#[tokio::test]
async fn api_requires_a_valid_bearer_token() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["success"], false);
}

#[rstest]
#[case(Method::GET, "/api/v1/orders/my-orders")]
#[case(Method::POST, "/api/v1/orders/capture-paypal")]
#[case(Method::GET, "/api/v1/notifications")]
#[case(Method::PUT, "/api/v1/notifications/read-all")]
#[case(Method::GET, "/api/v1/cart/preview")]
#[tokio::test]
async fn protected_routes_reject_anonymous_callers(#[case] method: Method, #[case] uri: &str) {
    let app = TestApp::new().await;

    let response = app.request(method, uri, None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[rstest]
#[case("/api/v1/orders")]
#[case("/api/v1/notifications/send-to-all")]
#[tokio::test]
async fn admin_routes_reject_customers(#[case] uri: &str) {
    let app = TestApp::new().await;
    let method = if uri.ends_with("send-to-all") {
        Method::POST
    } else {
        Method::GET
    };

    let response = app
        .request(method, uri, Some(json!({})), Some(&app.customer_token()))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn responses_carry_the_request_id() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = TestApp::new().await;
    let token = app.customer_token();

    let response = app
        .request_raw(Method::POST, "/api/v1/orders", "{\"phone\": ", &token)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Malformed request body"));
}

#[tokio::test]
async fn validation_errors_name_nested_fields() {
    let app = TestApp::new().await;
    let token = app.customer_token();

    let mut address = common::shipping_address();
    address["city"] = json!("");
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "shipping_address": address,
                "phone": "12",
                "payment_method": "cash_on_delivery"
            })),
            Some(&token),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Validation failed");
    let errors: Vec<String> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e.as_str().unwrap().to_string())
        .collect();
    assert!(errors.iter().any(|e| e.starts_with("phone:")));
    assert!(errors.iter().any(|e| e.starts_with("shipping_address.city:")));
}

#[tokio::test]
async fn cart_lines_merge_and_preview_prices_them() {
    let app = TestApp::new().await;
    let token = app.customer_token();
    let line = json!({
        "product_id": app.catalog.product_id,
        "metal_id": app.catalog.metal_id,
        "purity_karat": "18k",
        "stone_id": app.catalog.stone_id,
        "ring_size": "7",
        "quantity": 1
    });

    for _ in 0..2 {
        let response = app
            .request(Method::POST, "/api/v1/cart", Some(line.clone()), Some(&token))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let body = response_json(app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await).await;
    assert_eq!(body["data"]["lines"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["item_count"], 2);
    let line_id = body["data"]["lines"][0]["id"].as_str().unwrap().to_string();

    let body = response_json(
        app.request(Method::GET, "/api/v1/cart/preview", None, Some(&token))
            .await,
    )
    .await;
    let total: Decimal = body["data"]["totals"]["total"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(total, dec!(1900));

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/{}", line_id),
            Some(json!({ "quantity": 3 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["quantity"], 3);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/{}", line_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::GET, "/api/v1/cart/preview", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_purity_is_rejected() {
    let app = TestApp::new().await;
    let token = app.customer_token();

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart",
            Some(json!({
                "product_id": app.catalog.product_id,
                "metal_id": app.catalog.metal_id,
                "purity_karat": "24K",
                "quantity": 1
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn broadcast_is_admin_only_and_accepts_encoded_data() {
    let app = TestApp::new().await;
    app.register_device(app.customer.id, "customer-phone").await;
    let payload = json!({
        "title": "New collection",
        "body": "Rose gold is here",
        "type": "promotion",
        "data": "{\"collection\":\"rose\",\"priority\":2}",
        "filter": { "user_ids": app.customer.id.to_string() }
    });

    let response = app
        .request(
            Method::POST,
            "/api/v1/notifications/send-to-all",
            Some(payload.clone()),
            Some(&app.customer_token()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .request(
            Method::POST,
            "/api/v1/notifications/send-to-all",
            Some(payload),
            Some(&app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["records_created"], 1);

    let message = app.push.messages.lock().unwrap()[0].clone();
    assert_eq!(message.data.get("collection").map(String::as_str), Some("rose"));
    assert_eq!(message.data.get("priority").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn inbox_can_be_read_and_cleaned() {
    let app = TestApp::new().await;
    let token = app.customer_token();

    for title in ["First", "Second"] {
        let response = app
            .request(
                Method::POST,
                &format!("/api/v1/notifications/send-to-user/{}", app.customer.id),
                Some(json!({ "title": title, "body": "hello" })),
                Some(&app.admin_token()),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let body = response_json(
        app.request(
            Method::GET,
            "/api/v1/notifications?unread_only=yes",
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["unread_count"], 2);
    let first_id = body["data"]["notifications"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/notifications/{}/read", first_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(
        app.request(
            Method::PUT,
            "/api/v1/notifications/read-all",
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["count"], 1);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/notifications/{}", first_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/notifications/{}", first_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn device_tokens_register_and_unregister() {
    let app = TestApp::new().await;
    let token = app.customer_token();

    let response = app
        .request(
            Method::POST,
            "/api/v1/notifications/token",
            Some(json!({ "token": "fcm-abc", "platform": "ios" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["token"], "fcm-abc");

    let response = app
        .request(
            Method::DELETE,
            "/api/v1/notifications/token",
            Some(json!({ "token": "fcm-abc" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
