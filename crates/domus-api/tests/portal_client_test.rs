#![allow(clippy::unwrap_used)]
// Integration tests for `PortalClient` using wiremock.

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use domus_api::models::{ApplyRequest, ActionDefinition, CommandRequest, PortalEvent};
use domus_api::{Error, LoginMethod, Portal, PortalClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, PortalClient) {
    let server = MockServer::start().await;
    let portal = Portal::Custom {
        endpoint: format!("{}/", server.uri()),
        token_endpoint: Some(format!("{}/token", server.uri())),
    };
    let client = PortalClient::new(portal, &TransportConfig::default()).unwrap();
    (server, client)
}

fn credentials() -> LoginMethod {
    LoginMethod::Credentials {
        user_id: "user@example.com".into(),
        password: SecretString::from("hunter2".to_owned()),
    }
}

// ── Authentication tests ────────────────────────────────────────────

#[tokio::test]
async fn test_login_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("userId=user%40example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;

    client.login(&credentials()).await.unwrap();
}

#[tokio::test]
async fn test_login_credential_rejection() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorCode": "AUTHENTICATION_ERROR",
            "error": "Bad credentials"
        })))
        .mount(&server)
        .await;

    let result = client.login(&credentials()).await;

    let err = result.unwrap_err();
    assert!(
        matches!(err, Error::Authentication { .. }),
        "expected Authentication error, got: {err:?}"
    );
    assert!(err.is_auth_rejection());
    assert!(!err.is_auth_expired());
}

#[tokio::test]
async fn test_token_exchange_login_carries_bearer() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-123",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("accessToken=tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;

    // Subsequent API calls must carry the exchanged bearer token.
    Mock::given(method("GET"))
        .and(path("/setup/devices"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let method_ = LoginMethod::TokenExchange {
        client_id: "client".into(),
        client_secret: SecretString::from("secret".to_owned()),
        user_id: "user@example.com".into(),
        password: SecretString::from("hunter2".to_owned()),
    };
    client.login(&method_).await.unwrap();

    let devices = client.list_devices().await.unwrap();
    assert!(devices.is_empty());
}

#[tokio::test]
async fn test_session_expiry_classification() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/setup/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorCode": "RESOURCE_ACCESS_DENIED",
            "error": "Not authenticated"
        })))
        .mount(&server)
        .await;

    let err = client.list_devices().await.unwrap_err();
    assert!(err.is_auth_expired());
    assert!(!err.is_auth_rejection());
}

// ── Device tests ────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices() {
    let (server, client) = setup().await;

    let body = json!([{
        "deviceURL": "io://1234-5678-9012/13579246#1",
        "label": "Living room shutter",
        "controllableName": "io:RollerShutterGenericIOComponent",
        "definition": {
            "uiClass": "RollerShutter",
            "widgetName": "PositionableRollerShutter",
            "commands": [
                {"commandName": "open", "nparams": 0},
                {"commandName": "setClosure", "nparams": 1}
            ]
        },
        "states": [
            {"name": "core:ClosureState", "type": 1, "value": 100}
        ]
    }]);

    Mock::given(method("GET"))
        .and(path("/setup/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_url, "io://1234-5678-9012/13579246#1");
    assert_eq!(devices[0].definition.ui_class, "RollerShutter");
    assert_eq!(devices[0].definition.commands.len(), 2);
}

#[tokio::test]
async fn test_get_device_states_encodes_device_url() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(
            "/setup/devices/io%3A%2F%2F1234-5678-9012%2F13579246%231/states",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "core:ClosureState", "type": 1, "value": 42}
        ])))
        .mount(&server)
        .await;

    let states = client
        .get_device_states("io://1234-5678-9012/13579246#1")
        .await
        .unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].name, "core:ClosureState");
}

// ── Event feed tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_register_and_fetch_events() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/events/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "listener-1"})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/events/listener-1/fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "name": "DeviceStateChangedEvent",
                "deviceURL": "io://1234-5678-9012/13579246#1",
                "deviceStates": [{"name": "core:ClosureState", "type": 1, "value": 0}]
            },
            {
                "name": "SomeBrandNewEvent",
                "payload": {"whatever": true}
            },
            42
        ])))
        .mount(&server)
        .await;

    let listener = client.register_event_listener().await.unwrap();
    assert_eq!(listener, "listener-1");

    let events = client.fetch_events(&listener).await.unwrap();
    // The malformed `42` element is skipped; the unknown name is folded.
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], PortalEvent::DeviceStateChanged { .. }));
    assert!(matches!(events[1], PortalEvent::Unknown));
}

#[tokio::test]
async fn test_fetch_with_expired_listener() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/events/stale/fetch"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorCode": "NO_REGISTERED_EVENT_LISTENER",
            "error": "No registered event listener"
        })))
        .mount(&server)
        .await;

    let err = client.fetch_events("stale").await.unwrap_err();
    assert!(err.is_listener_unknown());
}

// ── Execution tests ─────────────────────────────────────────────────

fn sample_request() -> ApplyRequest {
    ApplyRequest {
        label: "close shutter".into(),
        actions: vec![ActionDefinition {
            device_url: "io://1234-5678-9012/13579246#1".into(),
            commands: vec![CommandRequest {
                name: "close".into(),
                parameters: vec![],
            }],
        }],
    }
}

#[tokio::test]
async fn test_apply_actions() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/exec/apply"))
        .and(body_string_contains("\"close shutter\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"execId": "exec-42"})))
        .mount(&server)
        .await;

    let exec_id = client.apply_actions(&sample_request(), false).await.unwrap();
    assert_eq!(exec_id, "exec-42");
}

#[tokio::test]
async fn test_apply_actions_high_priority_path() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/exec/apply/highPriority"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"execId": "exec-99"})))
        .mount(&server)
        .await;

    let exec_id = client.apply_actions(&sample_request(), true).await.unwrap();
    assert_eq!(exec_id, "exec-99");
}

#[tokio::test]
async fn test_cancel_execution() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/exec/current/setup/exec-42"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    client.cancel_execution("exec-42").await.unwrap();
}

#[tokio::test]
async fn test_execution_queue_full_classification() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/exec/apply"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorCode": "EXEC_QUEUE_FULL",
            "error": "Execution queue is full on gateway: 1234-5678-9012"
        })))
        .mount(&server)
        .await;

    let err = client
        .apply_actions(&sample_request(), false)
        .await
        .unwrap_err();
    assert!(err.is_execution_queue_full());
}
