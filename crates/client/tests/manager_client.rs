//! ManagerClient behavior against the fake service.

mod support;

use std::sync::Arc;

use bolt_client::protocol::{AuthFlags, Policy, Status, prop};
use parking_lot::Mutex;
use serde_json::json;
use support::{connect, eventually, settle};

#[tokio::test]
async fn connect_snapshots_the_manager() {
    let (_connection, client, _bolt) = connect().await;
    assert_eq!(client.version(), 1);
    assert!(!client.probing());
    assert!(client.auth_mode().is_enabled());
}

#[tokio::test]
async fn probing_changes_fire_exactly_once_per_transition() {
    let (_connection, client, bolt) = connect().await;

    let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = client.on_probing_changed({
        let seen = Arc::clone(&seen);
        move |value| seen.lock().push(*value)
    });

    bolt.set_manager_property(prop::PROBING, json!(true));
    // Same value again: cache refresh, no event.
    bolt.set_manager_property(prop::PROBING, json!(true));
    // A batch not touching Probing: no event.
    bolt.set_manager_property(prop::AUTH_MODE, json!("enabled|secure"));
    bolt.set_manager_property(prop::PROBING, json!(false));

    eventually(|| seen.lock().len() == 2).await;
    settle().await;
    assert_eq!(*seen.lock(), vec![true, false]);
    assert!(!client.probing());
}

#[tokio::test]
async fn device_added_republishes_a_bound_device() {
    let (_connection, client, bolt) = connect().await;

    let seen: Arc<Mutex<Vec<(String, Status)>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = client.on_device_added({
        let seen = Arc::clone(&seen);
        move |device| seen.lock().push((device.uid(), device.status()))
    });

    bolt.plug_device("dock-1", Status::Connected);

    eventually(|| !seen.lock().is_empty()).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], ("dock-1".to_string(), Status::Connected));
}

#[tokio::test]
async fn duplicate_device_added_fires_twice() {
    let (_connection, client, bolt) = connect().await;

    let count = Arc::new(Mutex::new(0usize));
    let _sub = client.on_device_added({
        let count = Arc::clone(&count);
        move |_| *count.lock() += 1
    });

    let path = bolt.plug_device("dock-1", Status::Connected);
    bolt.replug(&path);

    eventually(|| *count.lock() == 2).await;
}

#[tokio::test]
async fn enroll_device_returns_the_enrolled_device() {
    let (_connection, client, bolt) = connect().await;
    bolt.plug_device("dock-1", Status::Connected);

    let device = client.enroll_device("dock-1", Policy::Auto).await.unwrap();
    assert_eq!(device.uid(), "dock-1");
    assert!(device.status().is_authorized());
    assert!(device.stored());
    assert_eq!(device.policy(), Policy::Auto);
}

#[tokio::test]
async fn enroll_failure_surfaces_the_bare_service_message() {
    let (_connection, client, bolt) = connect().await;
    bolt.plug_device("dock-1", Status::Connected);
    bolt.script_enroll(bolt_client::fake_bus::EnrollOutcome::fail(
        "TimeoutError",
        "timeout",
    ));

    let error = client
        .enroll_device("dock-1", Policy::Default)
        .await
        .unwrap_err();
    assert!(error.is_call());
    assert_eq!(error.call_name(), Some("TimeoutError"));
    assert_eq!(error.to_string(), "timeout");
}

#[tokio::test]
async fn enroll_unknown_uid_fails_per_call() {
    let (_connection, client, _bolt) = connect().await;
    let error = client
        .enroll_device("ghost", Policy::Default)
        .await
        .unwrap_err();
    assert!(error.is_call());
    assert_eq!(error.call_name(), Some("NotFound"));
}

#[tokio::test]
async fn list_devices_binds_every_known_device() {
    let (_connection, client, bolt) = connect().await;
    bolt.plug_device("dock-1", Status::Connected);
    bolt.plug_device("ssd-2", Status::Authorized);

    let devices = client.list_devices().await.unwrap();
    let mut uids: Vec<String> = devices.iter().map(|d| d.uid()).collect();
    uids.sort();
    assert_eq!(uids, vec!["dock-1", "ssd-2"]);
}

#[tokio::test]
async fn device_by_uid_round_trip() {
    let (_connection, client, bolt) = connect().await;
    let path = bolt.plug_device("dock-1", Status::Connected);

    let device = client.device_by_uid("dock-1").await.unwrap();
    assert_eq!(device.path(), &path);
    assert_eq!(device.name(), "Fake Device 0");
    assert_eq!(device.vendor(), "ACME");

    let error = client.device_by_uid("ghost").await.unwrap_err();
    assert_eq!(error.call_name(), Some("NotFound"));
}

#[tokio::test]
async fn forget_device_removes_it_from_the_service() {
    let (_connection, client, bolt) = connect().await;
    bolt.plug_device("dock-1", Status::Connected);

    client.forget_device("dock-1").await.unwrap();
    assert!(client.device_by_uid("dock-1").await.is_err());
}

#[tokio::test]
async fn auth_mode_reads_through_the_cache() {
    let (_connection, client, bolt) = connect().await;
    assert!(client.auth_mode().is_enabled());

    bolt.set_manager_property(prop::AUTH_MODE, json!("secure"));
    eventually(|| !client.auth_mode().is_enabled()).await;
    assert!(client.auth_mode().has_token("secure"));
}

#[tokio::test]
async fn authorize_updates_the_mirrored_status() {
    let (_connection, client, bolt) = connect().await;
    bolt.plug_device("dock-1", Status::Connected);

    let device = client.device_by_uid("dock-1").await.unwrap();
    assert_eq!(device.status(), Status::Connected);

    device.authorize(AuthFlags::None).await.unwrap();
    eventually(|| device.status().is_authorized()).await;
}

#[tokio::test]
async fn close_detaches_the_client_from_the_bus() {
    let (_connection, client, bolt) = connect().await;

    let count = Arc::new(Mutex::new(0usize));
    let _sub = client.on_device_added({
        let count = Arc::clone(&count);
        move |_| *count.lock() += 1
    });

    client.close();
    bolt.plug_device("dock-1", Status::Connected);
    settle().await;
    assert_eq!(*count.lock(), 0);
}
