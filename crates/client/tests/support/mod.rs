//! Shared harness: a connected client against the fake service.

use std::sync::Arc;
use std::time::Duration;

use bolt_client::fake_bus::FakeBolt;
use bolt_client::{Connection, ManagerClient};

pub async fn connect() -> (Arc<Connection>, Arc<ManagerClient>, Arc<FakeBolt>) {
    let (parts, bolt) = FakeBolt::start();
    let connection = Connection::new(parts);
    tokio::spawn({
        let connection = Arc::clone(&connection);
        async move { connection.run().await }
    });

    let client = ManagerClient::connect(Arc::clone(&connection))
        .await
        .expect("fake service always binds");
    (connection, client, bolt)
}

/// Poll until `predicate` holds, failing the test after two seconds.
pub async fn eventually(predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Let queued tasks and in-flight notifications finish.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}
