//! Bus message framing types.
//!
//! Every frame on the wire is one JSON document. Outbound frames are method
//! calls; inbound frames are either replies (carrying the `id` of the call
//! they answer) or signals (no `id`). This mirrors the service's call/signal
//! bus: method calls complete asynchronously, property changes and object
//! lifecycle events arrive as signals.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ObjectPath;

/// Method call sent to the service.
///
/// ```json
/// {
///   "id": 42,
///   "path": "/org/freedesktop/bolt",
///   "method": "EnrollDevice",
///   "args": { "uid": "d1c9...", "policy": "default", "flags": "none" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCall {
    /// Unique call ID for correlating the reply.
    pub id: u32,
    /// Path of the target object (manager or device).
    pub path: ObjectPath,
    /// Method name to invoke.
    pub method: String,
    /// Method arguments; shape depends on the method.
    #[serde(default)]
    pub args: Value,
}

/// Reply to a method call.
///
/// Exactly one of `result` and `error` is present:
///
/// ```json
/// { "id": 42, "result": "/org/freedesktop/bolt/devices/0" }
/// { "id": 42, "error": { "name": "TimeoutError", "message": "timeout" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// Call ID this reply correlates to.
    pub id: u32,
    /// Success result (mutually exclusive with `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload (mutually exclusive with `result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
}

/// Error payload of a failed call.
///
/// `message` is what the service reported and is meaningful on its own;
/// `name` is an optional machine-readable error identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Signal emitted by a remote object.
///
/// Signals are distinguished from replies by the absence of an `id` field:
///
/// ```json
/// { "path": "/org/freedesktop/bolt", "member": "DeviceAdded",
///   "args": "/org/freedesktop/bolt/devices/0" }
/// ```
///
/// Property-change notifications are `PropertiesChanged` signals whose `args`
/// is a mapping of changed-property-name to new value, one signal per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Path of the object that emitted the signal.
    pub path: ObjectPath,
    /// Signal member name.
    pub member: String,
    /// Signal arguments; shape depends on the member.
    #[serde(default)]
    pub args: Value,
}

/// Discriminated union of inbound bus messages.
///
/// Uses serde's `untagged` to distinguish based on presence of `id`:
/// messages with `id` are replies, messages without are signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusMessage {
    /// Reply message (has `id` field).
    Reply(Reply),
    /// Signal message (no `id` field).
    Signal(Signal),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_call_serializes_with_args() {
        let call = MethodCall {
            id: 7,
            path: ObjectPath::new("/org/freedesktop/bolt"),
            method: "EnrollDevice".to_string(),
            args: serde_json::json!({"uid": "abc", "policy": "default"}),
        };

        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["path"], "/org/freedesktop/bolt");
        assert_eq!(value["method"], "EnrollDevice");
        assert_eq!(value["args"]["uid"], "abc");
    }

    #[test]
    fn message_with_id_parses_as_reply() {
        let json = r#"{"id": 42, "result": "/org/freedesktop/bolt/devices/0"}"#;
        let message: BusMessage = serde_json::from_str(json).unwrap();

        match message {
            BusMessage::Reply(reply) => {
                assert_eq!(reply.id, 42);
                assert!(reply.result.is_some());
                assert!(reply.error.is_none());
            }
            _ => panic!("expected Reply"),
        }
    }

    #[test]
    fn message_without_id_parses_as_signal() {
        let json = r#"{"path": "/org/freedesktop/bolt", "member": "DeviceAdded",
                       "args": "/org/freedesktop/bolt/devices/3"}"#;
        let message: BusMessage = serde_json::from_str(json).unwrap();

        match message {
            BusMessage::Signal(signal) => {
                assert_eq!(signal.path.as_str(), "/org/freedesktop/bolt");
                assert_eq!(signal.member, "DeviceAdded");
                assert_eq!(signal.args, "/org/freedesktop/bolt/devices/3");
            }
            _ => panic!("expected Signal"),
        }
    }

    #[test]
    fn error_reply_carries_name_and_message() {
        let json = r#"{"id": 1, "error": {"name": "TimeoutError", "message": "timeout"}}"#;
        let message: BusMessage = serde_json::from_str(json).unwrap();

        match message {
            BusMessage::Reply(reply) => {
                let error = reply.error.unwrap();
                assert_eq!(error.name.as_deref(), Some("TimeoutError"));
                assert_eq!(error.message, "timeout");
            }
            _ => panic!("expected Reply"),
        }
    }

    #[test]
    fn properties_changed_signal_is_a_batch() {
        let json = r#"{"path": "/org/freedesktop/bolt", "member": "PropertiesChanged",
                       "args": {"Probing": true, "AuthMode": "enabled"}}"#;
        let message: BusMessage = serde_json::from_str(json).unwrap();

        match message {
            BusMessage::Signal(signal) => {
                assert_eq!(signal.member, "PropertiesChanged");
                assert_eq!(signal.args["Probing"], true);
                assert_eq!(signal.args["AuthMode"], "enabled");
            }
            _ => panic!("expected Signal"),
        }
    }
}
