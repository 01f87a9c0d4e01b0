//! Call/reply correlation and signal routing on top of the transport.
//!
//! Outbound method calls get a unique id and a oneshot channel; the message
//! loop correlates inbound replies by id and completes the channel. Inbound
//! signals are routed by object path to whichever [`RemoteObject`] is
//! registered for that path.
//!
//! Malformed frames, replies with unknown ids and signals for unregistered
//! paths are debug-logged and dropped; none of them is fatal.
//!
//! [`RemoteObject`]: crate::remote_object::RemoteObject

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bolt_protocol::{BusMessage, MethodCall, ObjectPath, Reply, Signal};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Receiver side of signal routing.
///
/// Implemented by [`RemoteObject`](crate::remote_object::RemoteObject);
/// the registry holds weak references only, so an object disappears from
/// routing as soon as its owner drops it.
pub(crate) trait SignalSink: Send + Sync {
    fn on_signal(&self, member: &str, args: &Value);
}

/// Connection to the device-management service.
///
/// Thread-safe; share it across tasks with `Arc`. Multiple concurrent calls
/// are supported and correlate independently.
pub struct Connection {
    /// Sequential call id counter.
    last_id: AtomicU32,
    /// Pending call completions keyed by call id.
    callbacks: parking_lot::Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>,
    /// Signal routing table. Each bound mirror subscribes independently, so
    /// one path may carry several sinks (ownership is per-creation, never
    /// shared).
    objects: parking_lot::Mutex<HashMap<ObjectPath, Vec<(u64, Weak<dyn SignalSink>)>>>,
    /// Registration token counter for `objects` entries.
    last_registration: AtomicU64,
    /// Outbound half of the transport.
    sender: tokio::sync::Mutex<Box<dyn Transport>>,
    /// Inbound half, taken by the first (only) `run()` call.
    receiver: parking_lot::Mutex<Option<Box<dyn TransportReceiver>>>,
    message_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

impl Connection {
    pub fn new(parts: TransportParts) -> Arc<Self> {
        Arc::new(Self {
            last_id: AtomicU32::new(0),
            callbacks: parking_lot::Mutex::new(HashMap::new()),
            objects: parking_lot::Mutex::new(HashMap::new()),
            last_registration: AtomicU64::new(0),
            sender: tokio::sync::Mutex::new(parts.sender),
            receiver: parking_lot::Mutex::new(Some(parts.receiver)),
            message_rx: parking_lot::Mutex::new(Some(parts.message_rx)),
        })
    }

    /// Invoke `method` on the object at `path` and await its reply.
    ///
    /// A failure reported by the service surfaces as [`Error::Call`]; a
    /// transport teardown before the reply arrives surfaces as
    /// [`Error::ChannelClosed`].
    pub async fn call(&self, path: &ObjectPath, method: &str, args: Value) -> Result<Value> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().insert(id, tx);

        let call = MethodCall {
            id,
            path: path.clone(),
            method: method.to_string(),
            args,
        };

        let message = serde_json::to_value(&call)?;
        if let Err(e) = self.sender.lock().await.send(message).await {
            self.callbacks.lock().remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| Error::ChannelClosed).and_then(|result| result)
    }

    /// Drive the message loop until the transport closes.
    ///
    /// Spawn this in a background task; it may be called only once.
    pub async fn run(&self) {
        let receiver = self.receiver.lock().take();
        let message_rx = self.message_rx.lock().take();
        let (receiver, mut message_rx) = match (receiver, message_rx) {
            (Some(receiver), Some(message_rx)) => (receiver, message_rx),
            _ => {
                tracing::error!("connection run() called more than once");
                return;
            }
        };

        let transport_handle = tokio::spawn(async move {
            if let Err(e) = receiver.run().await {
                tracing::error!("transport error: {e}");
            }
        });

        while let Some(message) = message_rx.recv().await {
            match serde_json::from_value::<BusMessage>(message.clone()) {
                Ok(BusMessage::Reply(reply)) => self.dispatch_reply(reply),
                Ok(BusMessage::Signal(signal)) => self.dispatch_signal(signal),
                Err(e) => {
                    tracing::debug!("dropping unrecognized bus message: {e} - {message}");
                }
            }
        }

        tracing::debug!("bus message loop ended (transport closed)");

        // Fail whatever is still waiting for a reply.
        let pending: Vec<_> = self.callbacks.lock().drain().collect();
        drop(pending);

        let _ = transport_handle.await;
    }

    fn dispatch_reply(&self, reply: Reply) {
        let Some(callback) = self.callbacks.lock().remove(&reply.id) else {
            tracing::debug!(id = reply.id, "reply does not match any pending call");
            return;
        };

        let result = match reply.error {
            Some(error) => Err(Error::from_call_error(error)),
            None => Ok(reply.result.unwrap_or(Value::Null)),
        };

        // The caller may have given up; that is fine.
        let _ = callback.send(result);
    }

    fn dispatch_signal(&self, signal: Signal) {
        let sinks: Vec<Arc<dyn SignalSink>> = {
            let mut objects = self.objects.lock();
            match objects.get_mut(&signal.path) {
                Some(entries) => {
                    // Prune mirrors whose owners are gone.
                    entries.retain(|(_, weak)| weak.strong_count() > 0);
                    let sinks = entries
                        .iter()
                        .filter_map(|(_, weak)| weak.upgrade())
                        .collect();
                    if entries.is_empty() {
                        objects.remove(&signal.path);
                    }
                    sinks
                }
                None => Vec::new(),
            }
        };

        if sinks.is_empty() {
            tracing::trace!(
                path = %signal.path,
                member = %signal.member,
                "signal for unregistered object"
            );
            return;
        }
        for sink in sinks {
            sink.on_signal(&signal.member, &signal.args);
        }
    }

    /// Register a mirror for signal routing; the returned token identifies
    /// this registration in [`unregister`](Self::unregister).
    pub(crate) fn register(&self, path: ObjectPath, sink: Weak<dyn SignalSink>) -> u64 {
        let token = self.last_registration.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().entry(path).or_default().push((token, sink));
        token
    }

    pub(crate) fn unregister(&self, path: &ObjectPath, token: u64) {
        let mut objects = self.objects.lock();
        if let Some(entries) = objects.get_mut(path) {
            entries.retain(|(entry_token, _)| *entry_token != token);
            if entries.is_empty() {
                objects.remove(path);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pending_calls", &self.callbacks.lock().len())
            .field("registered_objects", &self.objects.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_bus::FakeTransportBuilder;
    use bolt_protocol::CallError;
    use serde_json::json;

    fn test_connection() -> Arc<Connection> {
        let (parts, _controller) = FakeTransportBuilder::new().build();
        Connection::new(parts)
    }

    #[test]
    fn call_ids_increment() {
        let connection = test_connection();
        assert_eq!(connection.last_id.fetch_add(1, Ordering::SeqCst), 0);
        assert_eq!(connection.last_id.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(connection.last_id.fetch_add(1, Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reply_completes_the_matching_call() {
        let connection = test_connection();

        let id = connection.last_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        connection.callbacks.lock().insert(id, tx);

        connection.dispatch_reply(Reply {
            id,
            result: Some(json!({"status": "ok"})),
            error: None,
        });

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn error_reply_becomes_call_error() {
        let connection = test_connection();

        let id = connection.last_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        connection.callbacks.lock().insert(id, tx);

        connection.dispatch_reply(Reply {
            id,
            result: None,
            error: Some(CallError {
                message: "authorization timed out".to_string(),
                name: Some("TimeoutError".to_string()),
            }),
        });

        let error = rx.await.unwrap().unwrap_err();
        assert!(error.is_call());
        assert_eq!(error.call_name(), Some("TimeoutError"));
        assert_eq!(error.to_string(), "authorization timed out");
    }

    #[tokio::test]
    async fn replies_correlate_out_of_order() {
        let connection = test_connection();

        let id1 = connection.last_id.fetch_add(1, Ordering::SeqCst);
        let id2 = connection.last_id.fetch_add(1, Ordering::SeqCst);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        connection.callbacks.lock().insert(id1, tx1);
        connection.callbacks.lock().insert(id2, tx2);

        connection.dispatch_reply(Reply {
            id: id2,
            result: Some(json!("second")),
            error: None,
        });
        connection.dispatch_reply(Reply {
            id: id1,
            result: Some(json!("first")),
            error: None,
        });

        assert_eq!(rx1.await.unwrap().unwrap(), "first");
        assert_eq!(rx2.await.unwrap().unwrap(), "second");
    }

    #[test]
    fn unknown_reply_id_is_ignored() {
        let connection = test_connection();
        // Must not panic or disturb anything.
        connection.dispatch_reply(Reply {
            id: 999,
            result: Some(Value::Null),
            error: None,
        });
    }

    #[test]
    fn signal_routes_to_registered_sink() {
        struct Recorder {
            seen: parking_lot::Mutex<Vec<(String, Value)>>,
        }
        impl SignalSink for Recorder {
            fn on_signal(&self, member: &str, args: &Value) {
                self.seen.lock().push((member.to_string(), args.clone()));
            }
        }

        let connection = test_connection();
        let recorder = Arc::new(Recorder {
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let path = ObjectPath::new("/org/freedesktop/bolt/devices/1");
        connection.register(
            path.clone(),
            Arc::downgrade(&recorder) as Weak<dyn SignalSink>,
        );

        connection.dispatch_signal(Signal {
            path: path.clone(),
            member: "PropertiesChanged".to_string(),
            args: json!({"Status": "authorized"}),
        });

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "PropertiesChanged");
        assert_eq!(seen[0].1["Status"], "authorized");
    }

    #[test]
    fn independent_mirrors_of_one_path_each_receive() {
        struct Counter {
            count: AtomicU32,
        }
        impl SignalSink for Counter {
            fn on_signal(&self, _member: &str, _args: &Value) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }

        let connection = test_connection();
        let path = ObjectPath::new("/org/freedesktop/bolt/devices/3");
        let first = Arc::new(Counter {
            count: AtomicU32::new(0),
        });
        let second = Arc::new(Counter {
            count: AtomicU32::new(0),
        });
        let first_token = connection.register(
            path.clone(),
            Arc::downgrade(&first) as Weak<dyn SignalSink>,
        );
        connection.register(
            path.clone(),
            Arc::downgrade(&second) as Weak<dyn SignalSink>,
        );

        let signal = Signal {
            path: path.clone(),
            member: "PropertiesChanged".to_string(),
            args: Value::Null,
        };
        connection.dispatch_signal(signal.clone());
        assert_eq!(first.count.load(Ordering::SeqCst), 1);
        assert_eq!(second.count.load(Ordering::SeqCst), 1);

        // Unregistering one mirror leaves the other attached.
        connection.unregister(&path, first_token);
        connection.dispatch_signal(signal);
        assert_eq!(first.count.load(Ordering::SeqCst), 1);
        assert_eq!(second.count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn signal_for_dropped_sink_prunes_the_entry() {
        struct Nop;
        impl SignalSink for Nop {
            fn on_signal(&self, _member: &str, _args: &Value) {}
        }

        let connection = test_connection();
        let path = ObjectPath::new("/org/freedesktop/bolt/devices/2");
        {
            let sink = Arc::new(Nop);
            connection.register(path.clone(), Arc::downgrade(&sink) as Weak<dyn SignalSink>);
        }

        connection.dispatch_signal(Signal {
            path: path.clone(),
            member: "PropertiesChanged".to_string(),
            args: Value::Null,
        });

        assert!(!connection.objects.lock().contains_key(&path));
    }
}
