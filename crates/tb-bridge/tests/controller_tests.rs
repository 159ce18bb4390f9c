//! BridgeController end-to-end tests
//!
//! Tests for:
//! - Success envelope on the per-order topic
//! - 401 followed by a single token refresh
//! - Malformed triggers short-circuiting to the error topic
//! - Order ids that cannot form a success topic
//! - Retry exhaustion and the audit row it leaves
//! - Audit store outages not affecting the publish
//! - Dispatcher publishing exactly one outcome per message, including
//!   messages still buffered when intake stops

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tb_audit::{MemoryAuditStore, StoreHandle};
use tb_bridge::{build_controller, handle_message, BridgeController, Dispatcher, PublishAction};
use tb_broker::{InboundMessage, RecordingPublisher};
use tb_config::AppConfig;

const TRIGGER_TOPIC: &str = "ACME/China/Pinghu/Area1/Internal/TriggerAPI/processorder";
const SUCCESS_BASE: &str = "ACME/China/Pinghu/Area1/SAP Workcenters/ProcessOrder";
const ERROR_TOPIC: &str = "/Internal/Errors/api";

fn test_config(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.api.base_url = format!("{}/api", server.uri());
    config.api.token_url = format!("{}/oauth/token", server.uri());
    config.api.client_id = "bridge-client".to_string();
    config.api.client_secret = "s3cret".to_string();
    config.api.retry_base_delay_ms = 5;
    config
}

fn create_controller(server: &MockServer, store: Option<Arc<MemoryAuditStore>>) -> BridgeController {
    let handle = match store {
        Some(store) => StoreHandle::connected(store),
        None => StoreHandle::new(),
    };
    build_controller(&test_config(server), Arc::new(handle)).unwrap()
}

async fn mount_token(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

fn payload_of(action: &PublishAction) -> Value {
    serde_json::from_slice(&action.payload().unwrap()).unwrap()
}

#[tokio::test]
async fn test_successful_trigger_publishes_to_order_topic() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(query_param("orderId", "O1"))
        .and(header("authorization", "Bearer t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    let controller = create_controller(&server, Some(store.clone()));

    let body = json!({"endpoint": "/orders", "params": {"orderId": "O1"}});
    let action = controller
        .process(TRIGGER_TOPIC, body.to_string().as_bytes())
        .await;

    assert!(action.is_success());
    assert_eq!(action.topic(), format!("{}/O1", SUCCESS_BASE));
    assert_eq!(
        payload_of(&action),
        json!({
            "request": {"endpoint": "/orders", "params": {"orderId": "O1"}},
            "response": {"result": "ok"},
            "status": "success"
        })
    );

    let rows = store.api_responses();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].endpoint, "/orders");
    assert_eq!(rows[0].status_code, 200);
    assert_eq!(rows[0].response_data, Some(json!({"result": "ok"})));
    assert!(rows[0].error_message.is_none());
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_once() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    mount_token(&server, "t-2", 1).await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer t-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer t-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"order": "O2"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    let controller = create_controller(&server, Some(store.clone()));

    let body = json!({"endpoint": "/orders", "params": {"orderId": "O2"}});
    let action = controller
        .process(TRIGGER_TOPIC, body.to_string().as_bytes())
        .await;

    assert!(action.is_success());
    assert_eq!(action.topic(), format!("{}/O2", SUCCESS_BASE));
    assert_eq!(payload_of(&action)["status"], "success");
    assert_eq!(store.api_responses().len(), 1);
}

#[tokio::test]
async fn test_malformed_body_publishes_error_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    let controller = create_controller(&server, Some(store.clone()));

    let action = controller.process(TRIGGER_TOPIC, b"{not json").await;

    assert!(!action.is_success());
    assert_eq!(action.topic(), ERROR_TOPIC);
    let payload = payload_of(&action);
    assert_eq!(payload["code"], 500);
    assert!(payload["error"].as_str().unwrap().starts_with("Invalid trigger"));
    assert_eq!(store.write_attempts(), 0);
}

#[tokio::test]
async fn test_missing_endpoint_publishes_error_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    let controller = create_controller(&server, Some(store.clone()));

    let action = controller
        .process(TRIGGER_TOPIC, br#"{"params":{"orderId":"O3"}}"#)
        .await;

    assert_eq!(action.topic(), ERROR_TOPIC);
    assert_eq!(
        payload_of(&action),
        json!({"error": "Invalid trigger: Missing endpoint", "code": 500})
    );
    assert_eq!(store.write_attempts(), 0);
}

#[tokio::test]
async fn test_retry_exhaustion_publishes_error_and_audits() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    let controller = create_controller(&server, Some(store.clone()));

    let body = json!({"endpoint": "/orders", "params": {"orderId": "O4"}});
    let action = controller
        .process(TRIGGER_TOPIC, body.to_string().as_bytes())
        .await;

    assert_eq!(action.topic(), ERROR_TOPIC);
    assert_eq!(
        payload_of(&action),
        json!({"error": "Request failed with status code 500", "code": 500})
    );

    let rows = store.api_responses();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status_code, 500);
    assert!(rows[0].response_data.is_none());
    assert_eq!(
        rows[0].error_message.as_deref(),
        Some("Request failed with status code 500")
    );
}

#[tokio::test]
async fn test_token_failure_publishes_error_and_audits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    let controller = create_controller(&server, Some(store.clone()));

    let action = controller
        .process(TRIGGER_TOPIC, br#"{"endpoint":"/orders","params":{"orderId":"O5"}}"#)
        .await;

    assert_eq!(action.topic(), ERROR_TOPIC);
    assert_eq!(payload_of(&action)["code"], 503);
    assert_eq!(store.api_responses()[0].status_code, 503);
}

#[tokio::test]
async fn test_missing_order_id_uses_unknown_topic() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"up": true})))
        .mount(&server)
        .await;

    let controller = create_controller(&server, None);
    let action = controller
        .process(TRIGGER_TOPIC, br#"{"endpoint":"/status"}"#)
        .await;

    assert_eq!(action.topic(), format!("{}/unknown", SUCCESS_BASE));
}

#[tokio::test]
async fn test_null_params_use_unknown_topic() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let controller = create_controller(&server, None);
    let action = controller
        .process(TRIGGER_TOPIC, br#"{"endpoint":"/orders","params":null}"#)
        .await;

    assert!(action.is_success());
    assert_eq!(action.topic(), format!("{}/unknown", SUCCESS_BASE));
    assert_eq!(
        payload_of(&action)["request"],
        json!({"endpoint": "/orders", "params": null})
    );
}

#[tokio::test]
async fn test_wildcard_order_id_publishes_error_without_invoking() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    let controller = create_controller(&server, Some(store.clone()));

    let action = controller
        .process(TRIGGER_TOPIC, br#"{"endpoint":"/orders","params":{"orderId":"O+1"}}"#)
        .await;

    assert!(!action.is_success());
    assert_eq!(action.topic(), ERROR_TOPIC);
    let payload = payload_of(&action);
    assert_eq!(payload["code"], 500);
    assert!(payload["error"].as_str().unwrap().contains("O+1"));

    let rows = store.api_responses();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].endpoint, "/orders");
    assert_eq!(rows[0].status_code, 500);
    assert!(rows[0].response_data.is_none());
    assert!(rows[0].error_message.is_some());
}

#[tokio::test]
async fn test_multi_level_order_id_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let controller = create_controller(&server, None);

    for order_id in ["a/b", "#"] {
        let body = json!({"endpoint": "/orders", "params": {"orderId": order_id}});
        let action = controller
            .process(TRIGGER_TOPIC, body.to_string().as_bytes())
            .await;
        assert_eq!(action.topic(), ERROR_TOPIC, "order id {:?}", order_id);
    }
}

#[tokio::test]
async fn test_audit_outage_does_not_block_publish() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryAuditStore::new());
    store.set_failing(true);
    let controller = create_controller(&server, Some(store.clone()));

    let action = controller
        .process(TRIGGER_TOPIC, br#"{"endpoint":"/orders","params":{"orderId":"O6"}}"#)
        .await;

    assert!(action.is_success());
    assert_eq!(store.write_attempts(), 1);
    assert!(store.api_responses().is_empty());
}

#[tokio::test]
async fn test_handle_message_publishes_once() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .mount(&server)
        .await;

    let controller = create_controller(&server, None);
    let publisher = RecordingPublisher::new();

    let message = InboundMessage::new(
        TRIGGER_TOPIC,
        br#"{"endpoint":"/orders","params":{"orderId":"O7"}}"#.to_vec(),
    );
    let action = handle_message(&controller, &publisher, message).await;

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, action.topic());
    let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(body["response"], json!({"result": "ok"}));
}

#[tokio::test]
async fn test_dispatcher_publishes_one_outcome_per_message() {
    let server = MockServer::start().await;
    // Concurrent messages share one token
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
        .expect(4)
        .mount(&server)
        .await;

    let controller = Arc::new(create_controller(&server, None));
    let publisher = Arc::new(RecordingPublisher::new());
    let dispatcher = Dispatcher::new(controller, publisher.clone(), 2);

    let (tx, rx) = mpsc::channel(16);
    for i in 0..4 {
        let body = json!({"endpoint": "/orders", "params": {"orderId": format!("D{}", i)}});
        tx.send(InboundMessage::new(TRIGGER_TOPIC, body.to_string().into_bytes()))
            .await
            .unwrap();
    }
    tx.send(InboundMessage::new(TRIGGER_TOPIC, b"garbage".to_vec()))
        .await
        .unwrap();
    drop(tx);

    let (_stop_tx, stop_rx) = broadcast::channel(1);
    dispatcher.run(rx, stop_rx).await;

    assert_eq!(publisher.len(), 5);
    for i in 0..4 {
        assert_eq!(
            publisher.published_to(&format!("{}/D{}", SUCCESS_BASE, i)).len(),
            1
        );
    }
    assert_eq!(publisher.published_to(ERROR_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_dispatcher_stop_drains_buffered_and_in_flight() {
    let server = MockServer::start().await;
    mount_token(&server, "t-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "ok"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let controller = Arc::new(create_controller(&server, None));
    let publisher = Arc::new(RecordingPublisher::new());
    let dispatcher = Dispatcher::new(controller, publisher.clone(), 1);

    // The sender stays open: only the stop signal ends intake
    let (tx, rx) = mpsc::channel(16);
    for i in 0..3 {
        let body = json!({"endpoint": "/orders", "params": {"orderId": format!("S{}", i)}});
        tx.send(InboundMessage::new(TRIGGER_TOPIC, body.to_string().into_bytes()))
            .await
            .unwrap();
    }
    let (stop_tx, stop_rx) = broadcast::channel(1);
    stop_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(10), dispatcher.run(rx, stop_rx))
        .await
        .expect("dispatcher did not stop");

    assert_eq!(publisher.len(), 3);
    for i in 0..3 {
        assert_eq!(
            publisher.published_to(&format!("{}/S{}", SUCCESS_BASE, i)).len(),
            1
        );
    }
    // Intake is closed after the stop signal
    assert!(tx
        .send(InboundMessage::new(TRIGGER_TOPIC, b"{}".to_vec()))
        .await
        .is_err());
}

#[tokio::test]
async fn test_dispatcher_survives_publish_failures() {
    let server = MockServer::start().await;

    let controller = Arc::new(create_controller(&server, None));
    let publisher = Arc::new(RecordingPublisher::new());
    publisher.set_failing(true);
    let dispatcher = Dispatcher::new(controller, publisher.clone(), 4);

    let (tx, rx) = mpsc::channel(4);
    tx.send(InboundMessage::new(TRIGGER_TOPIC, b"{}".to_vec()))
        .await
        .unwrap();
    drop(tx);

    let (_stop_tx, stop_rx) = broadcast::channel(1);
    dispatcher.run(rx, stop_rx).await;
    assert!(publisher.is_empty());
}
