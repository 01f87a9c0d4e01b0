//! End-to-end walkthrough against the in-memory fake service.
//!
//! Connects a manager client, attaches the authorization robot and plugs a
//! few fake devices, printing what happens. Run with:
//!
//! ```sh
//! cargo run --example watch
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bolt_client::fake_bus::{EnrollOutcome, FakeBolt};
use bolt_client::protocol::Status;
use bolt_client::{AuthRobot, Connection, ManagerClient};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bolt_client=debug".into()),
        )
        .init();

    let (parts, bolt) = FakeBolt::start();
    let connection = Connection::new(parts);
    tokio::spawn({
        let connection = Arc::clone(&connection);
        async move { connection.run().await }
    });

    let client = ManagerClient::connect(connection).await?;
    println!(
        "connected: version {}, auth mode {:?}",
        client.version(),
        client.auth_mode()
    );

    let _added = client.on_device_added(|device| {
        println!("device added: {} ({})", device.name(), device.uid());
    });

    // Enroll everything except devices whose uid starts with "untrusted".
    let robot = AuthRobot::new(Arc::clone(&client), |device| {
        !device.uid().starts_with("untrusted")
    });
    let _failures = robot.on_enroll_failed(|failure| {
        println!(
            "enrollment failed for {}: {}",
            failure.device.uid(),
            failure.error
        );
    });

    bolt.script_enroll(EnrollOutcome::Succeed);
    bolt.script_enroll(EnrollOutcome::fail("TimeoutError", "timeout talking to device"));

    bolt.plug_device("dock-1", Status::Connected);
    bolt.plug_device("ssd-2", Status::Connected);
    bolt.plug_device("untrusted-3", Status::Connected);

    tokio::time::sleep(Duration::from_millis(100)).await;

    for device in client.list_devices().await? {
        println!(
            "{}: status {}, stored {}",
            device.uid(),
            device.status(),
            device.stored()
        );
    }

    robot.close();
    client.close();
    Ok(())
}
