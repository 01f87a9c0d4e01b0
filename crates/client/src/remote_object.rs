//! Local mirror of one remote object.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use bolt_protocol::{ObjectPath, member};
use serde_json::Value;

use crate::connection::{Connection, SignalSink};
use crate::error::{Error, Result};
use crate::events::{Listeners, Subscription};

/// A thin, lazily-connected mirror of one remote object (manager or device).
///
/// Holds the last-known property snapshot and dispatches incoming
/// property-change batches and signals to registered listeners. The mirror is
/// owned exclusively by whichever component bound it: the connection's
/// routing table keeps only a weak reference, so dropping the last `Arc` (or
/// calling [`release`](Self::release)) removes the object from routing and no
/// background reference survives.
pub struct RemoteObject {
    path: ObjectPath,
    connection: Arc<Connection>,
    /// Routing registration token; set once right after construction.
    registration: std::sync::OnceLock<u64>,
    properties: parking_lot::Mutex<PropertyCache>,
    /// Fired once per batch of changed properties, not once per property.
    property_listeners: Listeners<HashMap<String, Value>>,
    /// Per-member signal listeners.
    signal_listeners: parking_lot::Mutex<HashMap<String, Listeners<Value>>>,
}

struct PropertyCache {
    values: HashMap<String, Value>,
    /// Keys updated by batches that arrived while the bind snapshot was
    /// still in flight; `Some` only until the snapshot is applied.
    pre_snapshot: Option<HashSet<String>>,
}

impl RemoteObject {
    /// Establish the mirror of the object at `path`.
    ///
    /// Asynchronous: registers the mirror for signal routing first, then
    /// issues a `GetAll` to snapshot the properties; a change batch arriving
    /// while the snapshot is in flight is applied to the cache and wins over
    /// the snapshot for the keys it touched. Failure is a connection error,
    /// fatal to this handle only; the caller may retry by binding again.
    pub async fn bind(connection: &Arc<Connection>, path: ObjectPath) -> Result<Arc<Self>> {
        let object = Arc::new(Self {
            path: path.clone(),
            connection: Arc::clone(connection),
            registration: std::sync::OnceLock::new(),
            properties: parking_lot::Mutex::new(PropertyCache {
                values: HashMap::new(),
                pre_snapshot: Some(HashSet::new()),
            }),
            property_listeners: Listeners::new(),
            signal_listeners: parking_lot::Mutex::new(HashMap::new()),
        });

        let token =
            connection.register(path.clone(), Arc::downgrade(&object) as Weak<dyn SignalSink>);
        let _ = object.registration.set(token);

        // A failed bind drops `object`, whose Drop unregisters the token.
        let snapshot = connection
            .call(&path, member::GET_ALL, Value::Null)
            .await
            .map_err(|e| Error::Bind {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let snapshot: HashMap<String, Value> =
            serde_json::from_value(snapshot).map_err(|e| Error::Bind {
                path: path.clone(),
                message: format!("malformed property snapshot: {e}"),
            })?;

        {
            let mut cache = object.properties.lock();
            let touched = cache.pre_snapshot.take().unwrap_or_default();
            for (name, value) in snapshot {
                if !touched.contains(&name) {
                    cache.values.insert(name, value);
                }
            }
        }

        tracing::trace!(path = %object.path, "bound remote object");
        Ok(object)
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Last cached value of `name`. Synchronous, never blocks.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.properties.lock().values.get(name).cloned()
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_bool())
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.as_u64())
    }

    /// Invoke a method on the remote object.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value> {
        self.connection.call(&self.path, method, args).await
    }

    /// Listen for property-change batches.
    ///
    /// The callback receives the changed properties only, after the cache
    /// has been updated.
    pub fn on_properties_changed(
        &self,
        listener: impl Fn(&HashMap<String, Value>) + Send + Sync + 'static,
    ) -> Subscription {
        self.property_listeners.subscribe(listener)
    }

    /// Listen for a signal by member name.
    pub fn on_signal(
        &self,
        member: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.signal_listeners
            .lock()
            .entry(member.to_string())
            .or_default()
            .subscribe(listener)
    }

    /// Detach all listeners and stop receiving signals.
    ///
    /// The handle must not be used afterwards.
    pub fn release(&self) {
        if let Some(token) = self.registration.get() {
            self.connection.unregister(&self.path, *token);
        }
        self.property_listeners.clear();
        self.signal_listeners.lock().clear();
        tracing::trace!(path = %self.path, "released remote object");
    }
}

impl SignalSink for RemoteObject {
    fn on_signal(&self, member: &str, args: &Value) {
        if member == member::PROPERTIES_CHANGED {
            let changes: HashMap<String, Value> = match serde_json::from_value(args.clone()) {
                Ok(changes) => changes,
                Err(e) => {
                    tracing::debug!(path = %self.path, "malformed property batch: {e}");
                    return;
                }
            };

            {
                let mut cache = self.properties.lock();
                for (name, value) in &changes {
                    cache.values.insert(name.clone(), value.clone());
                }
                if let Some(touched) = cache.pre_snapshot.as_mut() {
                    touched.extend(changes.keys().cloned());
                }
            }

            self.property_listeners.emit(&changes);
            return;
        }

        let listeners = self.signal_listeners.lock().get(member).cloned();
        match listeners {
            Some(listeners) => listeners.emit(args),
            None => tracing::trace!(path = %self.path, member, "signal without listeners"),
        }
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        // Owner dropped the last strong reference without calling release().
        if let Some(token) = self.registration.get() {
            self.connection.unregister(&self.path, *token);
        }
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("path", &self.path)
            .field("properties", &self.properties.lock().values.len())
            .finish()
    }
}
