#![allow(clippy::unwrap_used)]
// End-to-end lifecycle tests for `Hub` against a wiremock portal:
// connect, topology assembly, event-driven state sync, execution
// round-trips, and listener recovery.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use domus_core::{
    Action, Command, ConnectionState, CoreError, DeviceUrl, ExecutionOutcome, ExecutionUpdate,
    Hub, HubConfig, LoginMethod, Portal, StateValue,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// A scriptable event feed: each fetch pops one queued batch, or an
/// empty array when the queue is dry.
#[derive(Clone)]
struct EventFeed(Arc<Mutex<VecDeque<serde_json::Value>>>);

impl EventFeed {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(VecDeque::new())))
    }

    fn push(&self, batch: serde_json::Value) {
        self.0.lock().unwrap().push_back(batch);
    }
}

impl Respond for EventFeed {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let batch = self
            .0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| json!([]));
        ResponseTemplate::new(200).set_body_json(batch)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn test_config(server: &MockServer) -> HubConfig {
    let mut cfg = HubConfig::new(
        Portal::Custom {
            endpoint: format!("{}/", server.uri()),
            token_endpoint: None,
        },
        LoginMethod::Credentials {
            user_id: "user@example.com".into(),
            password: SecretString::from("pw".to_owned()),
        },
    );
    cfg.event_poll_idle = Duration::from_millis(50);
    cfg.event_poll_active = Duration::from_millis(20);
    cfg.fetch_retry = Duration::from_millis(30);
    cfg.refresh_interval = Duration::from_secs(3600);
    cfg.refresh_fallback = Duration::from_millis(100);
    cfg.execution_retry = Duration::from_millis(20);
    cfg.execution_timeout = Duration::from_secs(5);
    cfg.lockdown_base = Duration::from_millis(50);
    cfg
}

fn device_listing() -> serde_json::Value {
    json!([
        {
            "deviceURL": "io://gw/1#1",
            "label": "Boiler",
            "controllableName": "io:HeatingComponent",
            "definition": {
                "uiClass": "HeatingSystem",
                "commands": [{"commandName": "setTargetTemperature", "nparams": 1}]
            },
            "states": [{"name": "core:TargetTemperatureState", "type": 2, "value": 21.0}]
        },
        {
            "deviceURL": "io://gw/1#2",
            "label": "Boiler temperature",
            "controllableName": "io:TemperatureSensor",
            "definition": { "uiClass": "TemperatureSensor", "commands": [] },
            "states": [{"name": "core:TemperatureState", "type": 2, "value": 19.5}]
        },
        {
            "deviceURL": "io://gw/2#1",
            "label": "Living room shutter",
            "controllableName": "io:RollerShutterGenericIOComponent",
            "definition": {
                "uiClass": "RollerShutter",
                "commands": [
                    {"commandName": "open", "nparams": 0},
                    {"commandName": "close", "nparams": 0}
                ]
            },
            "states": [{"name": "core:ClosureState", "type": 1, "value": 100}]
        }
    ])
}

async fn mount_portal(server: &MockServer, feed: &EventFeed) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/setup/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_listing()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "listener-0"})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/listener-0/fetch"))
        .respond_with(feed.clone())
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/listener-0/unregister"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_assembles_topology_and_streams_state_changes() {
    init_tracing();
    let server = MockServer::start().await;
    let feed = EventFeed::new();
    mount_portal(&server, &feed).await;

    let hub = Hub::new(test_config(&server)).unwrap();
    hub.connect().await.unwrap();
    assert_eq!(*hub.connection_state().borrow(), ConnectionState::Connected);

    // Topology: two physical devices, the sensor hangs off the boiler.
    let roots = hub.devices();
    assert_eq!(roots.len(), 2);
    let boiler = hub.device(&DeviceUrl::new("io://gw/1#1")).unwrap();
    assert_eq!(boiler.sensors, vec![DeviceUrl::new("io://gw/1#2")]);
    let sensor = hub.device(&DeviceUrl::new("io://gw/1#2")).unwrap();
    assert_eq!(sensor.parent, Some(DeviceUrl::new("io://gw/1#1")));

    // Initial states were applied from the listing.
    let shutter_url = DeviceUrl::new("io://gw/2#1");
    assert_eq!(
        hub.states(&shutter_url).unwrap().get("core:ClosureState"),
        Some(&StateValue::Number(100.0))
    );

    // A state-changed event flows through fetch → sync → debounce →
    // one coalesced notification.
    let mut rx = hub.subscribe_states(&shutter_url).unwrap();
    feed.push(json!([{
        "name": "DeviceStateChangedEvent",
        "deviceURL": "io://gw/2#1",
        "deviceStates": [{"name": "core:ClosureState", "type": 1, "value": 25}]
    }]));

    let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("state notification within deadline")
        .unwrap();
    assert_eq!(batch.device_url, shutter_url);
    assert_eq!(
        batch.states,
        vec![("core:ClosureState".to_owned(), StateValue::Number(25.0))]
    );
    assert_eq!(
        hub.states(&shutter_url).unwrap().get("core:ClosureState"),
        Some(&StateValue::Number(25.0))
    );

    hub.disconnect().await;
    assert_eq!(
        *hub.connection_state().borrow(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn execution_roundtrip_settles_through_the_event_feed() {
    init_tracing();
    let server = MockServer::start().await;
    let feed = EventFeed::new();
    mount_portal(&server, &feed).await;
    Mock::given(method("POST"))
        .and(path("/exec/apply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"execId": "exec-1"})))
        .mount(&server)
        .await;

    let hub = Hub::new(test_config(&server)).unwrap();
    hub.connect().await.unwrap();

    let mut updates = hub.subscribe_executions();
    let actions = vec![Action {
        device_url: DeviceUrl::new("io://gw/2#1"),
        commands: vec![Command::new("close")],
    }];
    let exec_id = hub.execute(actions, "close shutter").await.unwrap();
    assert_eq!(exec_id, "exec-1");
    assert_eq!(hub.pending_executions().len(), 1);

    // The terminal event arrives on the feed; the fast cadence picks it
    // up and the tracker settles the execution.
    feed.push(json!([{
        "name": "ExecutionStateChangedEvent",
        "execId": "exec-1",
        "newState": "COMPLETED",
        "timeToNextState": -1
    }]));

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = updates.recv().await.unwrap();
            if let ExecutionUpdate::Finished {
                exec_id, outcome, ..
            } = &*update
            {
                break (exec_id.clone(), *outcome);
            }
        }
    })
    .await
    .expect("execution settles within deadline");

    assert_eq!(finished, ("exec-1".to_owned(), ExecutionOutcome::Completed));
    assert!(hub.pending_executions().is_empty());

    hub.disconnect().await;
}

#[tokio::test]
async fn expired_listener_is_reregistered_silently() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/setup/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_listing()))
        .mount(&server)
        .await;

    // First registration hands out a listener the portal then forgets;
    // the second one works.
    struct SequentialListeners(std::sync::atomic::AtomicU64);
    impl Respond for SequentialListeners {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(json!({"id": format!("listener-{n}")}))
        }
    }
    Mock::given(method("POST"))
        .and(path("/events/register"))
        .respond_with(SequentialListeners(std::sync::atomic::AtomicU64::new(0)))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/events/listener-0/fetch"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorCode": "NO_REGISTERED_EVENT_LISTENER",
            "error": "No registered event listener"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/listener-1/fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1..)
        .mount(&server)
        .await;

    let hub = Hub::new(test_config(&server)).unwrap();
    hub.connect().await.unwrap();

    // listener-0 fails on the first poll; the next cycle re-registers
    // and polls listener-1. The mock expectations verify both.
    tokio::time::sleep(Duration::from_millis(300)).await;

    hub.disconnect().await;
    server.verify().await;
}

#[tokio::test]
async fn missing_refresh_completion_triggers_manual_reconciliation() {
    let server = MockServer::start().await;
    let feed = EventFeed::new();
    mount_portal(&server, &feed).await;
    Mock::given(method("PUT"))
        .and(path("/setup/devices/states/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut cfg = test_config(&server);
    cfg.refresh_interval = Duration::from_millis(150);
    cfg.refresh_fallback = Duration::from_millis(80);

    let hub = Hub::new(cfg).unwrap();
    hub.connect().await.unwrap();
    let connected_at_sync = hub.registry().last_full_refresh().unwrap();

    // No RefreshAllDevicesStatesCompletedEvent ever arrives, so the
    // fallback timer re-fetches the device list manually.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = hub.registry().last_full_refresh().unwrap();
    assert!(
        after > connected_at_sync,
        "fallback reconciliation must refresh the registry"
    );

    hub.disconnect().await;
}

#[tokio::test]
async fn credential_rejection_locks_down_reconnects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorCode": "AUTHENTICATION_ERROR",
            "error": "Bad credentials"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = test_config(&server);
    cfg.lockdown_base = Duration::from_secs(60);
    let hub = Hub::new(cfg).unwrap();

    let err = hub.connect().await.unwrap_err();
    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));

    // An immediate reconnect fails locally, without a second login call.
    let err = hub.connect().await.unwrap_err();
    assert!(matches!(err, CoreError::LockedOut { .. }));
    server.verify().await;
}

#[tokio::test]
async fn executing_against_an_unknown_device_fails_fast() {
    let server = MockServer::start().await;
    let hub = Hub::new(test_config(&server)).unwrap();

    let actions = vec![Action {
        device_url: DeviceUrl::new("io://gw/404#1"),
        commands: vec![Command::new("open")],
    }];
    let err = hub.execute(actions, "nope").await.unwrap_err();
    assert!(matches!(err, CoreError::DeviceNotFound { .. }));
}
