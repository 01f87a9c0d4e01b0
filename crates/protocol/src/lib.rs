//! Wire types for the bolt device-authorization bus protocol.
//!
//! This crate contains the serde-serializable types used for communication
//! with the device-management service over its call/signal bus. These types
//! represent the "protocol layer" - the shapes of data as they appear on the
//! wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and trivial
//!   accessors
//! * 1:1 with protocol: Match the service's manager and device interfaces
//! * Stable: Changes only when the wire protocol changes
//!
//! Higher-level ergonomic APIs are built on top of these types in
//! `bolt-client`.

pub mod message;
pub mod types;

pub use message::*;
pub use types::*;
