//! Scenarios against a real server, gated on OPCUA_TEST_SERVER_URL.
//!
//! These assume an anonymous-capable endpoint with security None, e.g. any
//! of the public reference servers or a local open62541-based simulator.

use opcua_client::messages::attributes::BrowseDescription;
use opcua_client::{Client, ClientConfig, NodeId, UserIdentity, Variant};

fn server_url() -> Option<String> {
    std::env::var("OPCUA_TEST_SERVER_URL").ok()
}

#[tokio::test]
async fn live_read_current_time() {
    let Some(url) = server_url() else {
        eprintln!("OPCUA_TEST_SERVER_URL not set, skipping");
        return;
    };
    let client = Client::connect(&url, UserIdentity::Anonymous, ClientConfig::default())
        .await
        .expect("connect");

    let result = client
        .read_value(NodeId::numeric(0, 2258))
        .await
        .expect("read CurrentTime");
    assert!(result.status().is_good());
    let reported = match result.value {
        Some(Variant::DateTime(dt)) => dt.to_unix_timestamp(),
        other => panic!("expected DateTime, got {other:?}"),
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    assert!((reported - now).abs() < 60);

    client.close().await;
}

#[tokio::test]
async fn live_browse_objects_folder() {
    let Some(url) = server_url() else {
        eprintln!("OPCUA_TEST_SERVER_URL not set, skipping");
        return;
    };
    let client = Client::connect(&url, UserIdentity::Anonymous, ClientConfig::default())
        .await
        .expect("connect");

    let outcomes = client
        .managed_browse(&[BrowseDescription::all_of(NodeId::numeric(0, 85))])
        .await
        .expect("browse Objects");
    assert!(outcomes[0].status.is_good());
    let server_object = outcomes[0]
        .references
        .iter()
        .find(|r| r.browse_name.name.as_deref() == Some("Server"))
        .expect("Objects folder must contain the Server object");
    assert_eq!(server_object.node_class, 1);

    client.close().await;
}
