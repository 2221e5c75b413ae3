use serde_json::json;
use std::time::Duration;
use storefront_api::{
    config::FcmConfig,
    push::{FcmClient, PushErrorCode, PushMessage, PushProvider},
};
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const SERVICE_ACCOUNT_KEY: &str = include_str!("fixtures/fcm_service_account.pem");
const SEND_PATH: &str = "/v1/projects/jewelry-shop/messages:send";

fn client_for(server: &MockServer) -> FcmClient {
    let config = FcmConfig {
        project_id: "jewelry-shop".into(),
        client_email: "push@jewelry-shop.iam.gserviceaccount.com".into(),
        private_key: SERVICE_ACCOUNT_KEY.into(),
        token_uri: format!("{}/token", server.uri()),
        api_base: server.uri(),
    };
    FcmClient::new(config, Duration::from_secs(2)).unwrap()
}

fn order_update() -> PushMessage {
    PushMessage {
        title: "Order shipped".into(),
        body: "Your ring is on its way".into(),
        image: None,
        data: [("type".to_string(), "order_update".to_string())]
            .into_iter()
            .collect(),
    }
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("jwt-bearer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.test",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_delivery(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_string_contains("\"token\":\"gone-phone\""))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": 404,
                "status": "NOT_FOUND",
                "message": "Requested entity was not found.",
                "details": [{ "errorCode": "UNREGISTERED" }]
            }
        })))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("authorization", "Bearer ya29.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/jewelry-shop/messages/0:1500415314455276%31bd1c9631bd1c96"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn multicast_reports_each_token_in_request_order() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    mount_delivery(&server).await;

    let tokens = vec![
        "phone-a".to_string(),
        "gone-phone".to_string(),
        "phone-b".to_string(),
    ];
    let result = client_for(&server)
        .send_multicast(&tokens, &order_update())
        .await
        .unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    let order: Vec<&str> = result.responses.iter().map(|r| r.token.as_str()).collect();
    assert_eq!(order, vec!["phone-a", "gone-phone", "phone-b"]);
    assert_eq!(result.responses[1].error, Some(PushErrorCode::Unregistered));
    assert!(result.responses[0].message_id.is_some());
}

#[tokio::test]
async fn access_token_is_shared_across_sends() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    mount_delivery(&server).await;

    let client = client_for(&server);
    let message_id = client.send("phone-a", &order_update()).await.unwrap();
    assert!(message_id.starts_with("projects/jewelry-shop/messages/"));

    let result = client
        .send_multicast(&["phone-b".to_string()], &order_update())
        .await
        .unwrap();
    assert_eq!(result.success_count, 1);
}

#[tokio::test]
async fn rejected_token_exchange_fails_the_whole_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid JWT Signature."
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = client_for(&server)
        .send_multicast(&["phone-a".to_string()], &order_update())
        .await;

    assert!(result.is_err());
}
