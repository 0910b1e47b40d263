//! Integration harness.
//!
//! Most scenarios run against the in-process loopback mock server (policy
//! None). The `live` module additionally exercises a real server when
//! OPCUA_TEST_SERVER_URL is set:
//!
//!   OPCUA_TEST_SERVER_URL=opc.tcp://host:4840 cargo test --test integration

mod live;
mod mock;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use opcua_client::messages::attributes::{BrowseDescription, ReadValueId};
use opcua_client::{
    Client, ClientConfig, DataValue, Error, MonitoredItemCallback, MonitoredItemSpec, NodeId,
    StatusCode, SubscriptionOptions, UserIdentity, Variant,
};

use mock::{MockOptions, MockServer};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

async fn connect(server: &MockServer) -> Client {
    Client::connect(&server.url, UserIdentity::Anonymous, ClientConfig::default())
        .await
        .expect("connect")
}

// ── Connect and session ───────────────────────────────────────────────────────

#[tokio::test]
async fn anonymous_connect_and_read_current_time() {
    init_tracing();
    let server = MockServer::spawn(MockOptions::default()).await;
    let client = connect(&server).await;

    // ns=0;i=2258 is CurrentTime.
    let result = client
        .read_value(NodeId::numeric(0, 2258))
        .await
        .expect("read");
    assert!(result.status().is_good());
    let reported = match result.value {
        Some(Variant::DateTime(dt)) => dt.to_unix_timestamp(),
        other => panic!("expected a DateTime, got {other:?}"),
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    assert!((reported - now).abs() < 60, "clock skew over a minute");

    client.close().await;
    // The CLO frame is fire-and-forget; give the mock a beat to read it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(*server.observations.close_session_seen.lock().unwrap());
    assert!(*server.observations.close_channel_seen.lock().unwrap());
}

#[tokio::test]
async fn discovered_endpoints_are_exposed() {
    init_tracing();
    let server = MockServer::spawn(MockOptions::default()).await;
    let client = connect(&server).await;
    // The mock advertises an internal hostname; the session was still
    // created against the client-supplied authority (the connect succeeded),
    // and the advertised description stays inspectable.
    assert_eq!(
        client.endpoint().endpoint_url.as_deref(),
        Some("opc.tcp://mock-internal:4840/ua")
    );
    assert_eq!(client.server_endpoints().len(), 1);
    client.close().await;
}

// ── Browse ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn browse_objects_folder_finds_server_object() {
    init_tracing();
    let server = MockServer::spawn(MockOptions::default()).await;
    let client = connect(&server).await;

    let outcomes = client
        .managed_browse(&[BrowseDescription::all_of(NodeId::numeric(0, 85))])
        .await
        .expect("browse");
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].status.is_good());
    // One reference now plus one behind the continuation point.
    assert_eq!(outcomes[0].references.len(), 2);
    let server_ref = &outcomes[0].references[0];
    assert_eq!(server_ref.browse_name.name.as_deref(), Some("Server"));
    assert_eq!(server_ref.node_class, 1);

    client.close().await;
}

#[tokio::test]
async fn browse_of_unknown_node_reports_per_item_status() {
    init_tracing();
    let server = MockServer::spawn(MockOptions::default()).await;
    let client = connect(&server).await;

    let results = client
        .browse(&[BrowseDescription::all_of(NodeId::numeric(0, 999_999))], 0)
        .await
        .expect("browse envelope is good");
    assert_eq!(results[0].status_code, StatusCode::BAD_NODE_ID_UNKNOWN);

    client.close().await;
}

// ── Per-item statuses and faults ──────────────────────────────────────────────

#[tokio::test]
async fn read_of_unknown_node_is_a_result_not_an_error() {
    init_tracing();
    let server = MockServer::spawn(MockOptions::default()).await;
    let client = connect(&server).await;

    let results = client
        .read(&[
            ReadValueId::value_of(NodeId::numeric(0, 2258)),
            ReadValueId::value_of(NodeId::string(7, "no-such-node")),
        ])
        .await
        .expect("envelope must be good");
    assert_eq!(results.len(), 2);
    assert!(results[0].status().is_good());
    assert_eq!(results[1].status(), StatusCode::BAD_NODE_ID_UNKNOWN);

    client.close().await;
}

#[tokio::test]
async fn service_fault_raises_but_keeps_the_channel() {
    init_tracing();
    let server = MockServer::spawn(MockOptions {
        fault_on_read: true,
        ..Default::default()
    })
    .await;
    let client = connect(&server).await;

    let err = client
        .read_value(NodeId::numeric(0, 2258))
        .await
        .expect_err("fault expected");
    assert_eq!(err.status_code(), Some(StatusCode::BAD_SERVICE_UNSUPPORTED));

    // The channel survives a ServiceFault: another service still works.
    let results = client
        .write(&[opcua_client::messages::attributes::WriteValue::value_of(
            NodeId::string(2, "setpoint"),
            1.5f64,
        )])
        .await
        .expect("write after fault");
    assert_eq!(results, vec![StatusCode::GOOD]);

    client.close().await;
}

#[tokio::test]
async fn write_and_method_call_round_trip() {
    init_tracing();
    let server = MockServer::spawn(MockOptions::default()).await;
    let client = connect(&server).await;

    let status = client
        .write_value(NodeId::string(2, "setpoint"), 42i32)
        .await
        .expect("write");
    assert!(status.is_good());

    let result = client
        .call_method(
            NodeId::numeric(0, 2253),
            NodeId::string(1, "Echo"),
            vec![Variant::Int32(7), Variant::from("x")],
        )
        .await
        .expect("call");
    assert!(result.status_code.is_good());
    // The mock echoes input arguments back.
    assert_eq!(
        result.output_arguments.unwrap(),
        vec![Variant::Int32(7), Variant::from("x")]
    );

    client.close().await;
}

// ── Replay defense ────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicated_chunk_closes_the_channel() {
    init_tracing();
    // Duplicate the response to the first post-activation service call.
    // Responses 1-3 are GetEndpoints/CreateSession/ActivateSession.
    let server = MockServer::spawn(MockOptions {
        duplicate_response_at: Some(4),
        ..Default::default()
    })
    .await;
    let client = connect(&server).await;

    // The read itself succeeds; the duplicate that follows it must kill the
    // channel without being delivered.
    let first = client.read_value(NodeId::numeric(0, 2258)).await;
    assert!(first.is_ok(), "original response is delivered");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = client
        .read_value(NodeId::numeric(0, 2258))
        .await
        .expect_err("channel must be closed after the replay");
    assert!(matches!(err, Error::ChannelClosed), "got {err:?}");
}

// ── Post-close behavior ───────────────────────────────────────────────────────

#[tokio::test]
async fn every_call_after_close_reports_channel_closed() {
    init_tracing();
    let server = MockServer::spawn(MockOptions::default()).await;
    let client = connect(&server).await;
    client.close().await;

    let err = client
        .read_value(NodeId::numeric(0, 2258))
        .await
        .expect_err("closed");
    assert!(matches!(err, Error::ChannelClosed));

    let err = client
        .browse(&[BrowseDescription::all_of(NodeId::numeric(0, 85))], 0)
        .await
        .expect_err("closed");
    assert!(matches!(err, Error::ChannelClosed));

    // close() is idempotent.
    client.close().await;
}

// ── Subscription and publish loop ─────────────────────────────────────────────

#[tokio::test]
async fn subscription_delivers_ordered_data_changes_and_acknowledges() {
    init_tracing();
    let server = MockServer::spawn(MockOptions {
        publish_interval: Duration::from_millis(40),
        notification_limit: 5,
        ..Default::default()
    })
    .await;
    let client = connect(&server).await;

    let subscription_id = client
        .create_subscription(SubscriptionOptions {
            publishing_interval_ms: 40.0,
            ..Default::default()
        })
        .await
        .expect("create subscription");
    assert_eq!(subscription_id, 1);

    let received: Arc<Mutex<Vec<(u32, DataValue)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let outcomes = client
        .create_monitored_items(
            subscription_id,
            vec![MonitoredItemSpec::value(
                NodeId::string(2, "counter"),
                MonitoredItemCallback::on_data_change(move |handle, value| {
                    sink.lock().unwrap().push((handle, value));
                }),
            )],
        )
        .await
        .expect("create monitored items");
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].status.is_good());
    let client_handle = outcomes[0].client_handle;

    // Five notifications at ~40 ms spacing, then keep-alives.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let delivered = received.lock().unwrap().clone();
    assert!(
        delivered.len() >= 4 && delivered.len() <= 5,
        "expected 4..=5 callbacks, got {}",
        delivered.len()
    );
    // All for our handle, values strictly increasing (mock increments).
    let mut last = -1i32;
    for (handle, value) in &delivered {
        assert_eq!(*handle, client_handle);
        match value.value {
            Some(Variant::Int32(v)) => {
                assert!(v > last, "values must arrive in order");
                last = v;
            }
            ref other => panic!("unexpected value {other:?}"),
        }
    }

    // Every sent sequence number was acknowledged on a later publish.
    let sent = server.observations.sent_sequences.lock().unwrap().clone();
    let acked: Vec<u32> = server
        .observations
        .acks
        .lock()
        .unwrap()
        .iter()
        .filter(|(id, _)| *id == subscription_id)
        .map(|(_, seq)| *seq)
        .collect();
    for seq in &sent[..sent.len().saturating_sub(1)] {
        assert!(acked.contains(seq), "sequence {seq} never acknowledged");
    }

    let info = client.subscription_info(subscription_id).expect("info");
    assert!(info.alive);
    assert_eq!(info.monitored_items, 1);

    let statuses = client
        .delete_subscriptions(&[subscription_id])
        .await
        .expect("delete");
    assert_eq!(statuses, vec![StatusCode::GOOD]);
    assert!(client.subscription_info(subscription_id).is_none());

    client.close().await;
}

#[tokio::test]
async fn keep_alives_keep_the_subscription_alive() {
    init_tracing();
    // Keep-alives only, from the very first publish.
    let server = MockServer::spawn(MockOptions {
        publish_interval: Duration::from_millis(30),
        notification_limit: 0,
        ..Default::default()
    })
    .await;
    let client = connect(&server).await;

    let subscription_id = client
        .create_subscription(SubscriptionOptions {
            publishing_interval_ms: 30.0,
            max_keep_alive_count: 5,
            ..Default::default()
        })
        .await
        .expect("create subscription");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let info = client.subscription_info(subscription_id).expect("info");
    assert!(info.alive, "keep-alives must count as liveness");

    client.close().await;
}
