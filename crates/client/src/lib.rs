//! Async client for the bolt device-authorization service.
//!
//! The service manages external hardware devices and exposes one manager
//! object plus zero-or-more device objects over an inter-process call/signal
//! bus. This crate mirrors those objects locally and keeps the mirrors
//! consistent as asynchronous property-change and object-added notifications
//! arrive, and it ships an authorization robot that serializes one-at-a-time
//! enrollment of newly connected devices.
//!
//! # Layers
//!
//! * [`transport`] - the seam to the bus: JSON frames in and out.
//! * [`connection`] - call/reply correlation and signal routing.
//! * [`remote_object`] - property mirror of one remote object.
//! * [`manager`] / [`device`] - typed clients for the two interfaces.
//! * [`robot`] - the enrollment queue.
//! * [`fake_bus`] - in-memory service emulation for tests.
//!
//! # Example
//!
//! ```ignore
//! let connection = Connection::new(parts);
//! tokio::spawn({
//!     let connection = Arc::clone(&connection);
//!     async move { connection.run().await }
//! });
//!
//! let client = ManagerClient::connect(connection).await?;
//! let robot = AuthRobot::new(Arc::clone(&client), |device| {
//!     device.stored() || session_is_unlocked()
//! });
//! let _failures = robot.on_enroll_failed(|failure| {
//!     eprintln!("could not authorize {}: {}", failure.device.name(), failure.error);
//! });
//! ```

pub mod connection;
pub mod device;
pub mod error;
pub mod events;
pub mod fake_bus;
pub mod manager;
pub mod remote_object;
pub mod robot;
pub mod transport;

pub use bolt_protocol as protocol;

pub use connection::Connection;
pub use device::Device;
pub use error::{Error, Result};
pub use events::Subscription;
pub use manager::ManagerClient;
pub use remote_object::RemoteObject;
pub use robot::{AuthRobot, EnrollFailure};
pub use transport::{PipeTransport, Transport, TransportParts, TransportReceiver};
