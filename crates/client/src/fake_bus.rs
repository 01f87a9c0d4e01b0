//! Fake in-memory bus for unit testing.
//!
//! Two layers: [`FakeTransportBuilder`] produces a transport whose frames
//! never leave the process, with a controller for injecting inbound messages
//! and inspecting outbound ones; [`FakeBolt`] sits on top of the controller
//! and emulates the device-management service itself - it answers `GetAll`,
//! `EnrollDevice` and friends against an in-memory object table, emits
//! `DeviceAdded` and `PropertiesChanged` signals on demand, and lets tests
//! script enrollment outcomes or hold replies back to observe what is in
//! flight.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bolt_protocol::{MethodCall, ObjectPath, Status, member, prop};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Builder for creating fake transport instances.
pub struct FakeTransportBuilder {
    // Nothing configurable yet.
}

impl FakeTransportBuilder {
    pub fn new() -> Self {
        Self {}
    }

    /// Build the fake transport, returning the parts for a
    /// [`Connection`](crate::connection::Connection) and a controller for
    /// driving the peer side.
    pub fn build(self) -> (TransportParts, FakeBusController) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sender = FakeSender {
            sent: Arc::clone(&sent),
            request_tx,
        };
        let receiver = FakeReceiver {
            inbound_rx,
            message_tx,
        };
        let controller = FakeBusController {
            inbound_tx,
            sent,
            request_rx: tokio::sync::Mutex::new(request_rx),
        };

        let parts = TransportParts {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
            message_rx,
        };

        (parts, controller)
    }
}

impl Default for FakeTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller for the peer side of a fake transport.
pub struct FakeBusController {
    inbound_tx: mpsc::UnboundedSender<Value>,
    sent: Arc<parking_lot::Mutex<Vec<Value>>>,
    request_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl FakeBusController {
    /// Inject a raw JSON message as if the service had sent it.
    pub fn inject(&self, message: Value) {
        let _ = self.inbound_tx.send(message);
    }

    /// Inject a successful reply for call `id`.
    pub fn inject_reply(&self, id: u32, result: Value) {
        self.inject(json!({ "id": id, "result": result }));
    }

    /// Inject an error reply for call `id`.
    pub fn inject_error(&self, id: u32, name: &str, message: &str) {
        self.inject(json!({
            "id": id,
            "error": { "name": name, "message": message }
        }));
    }

    /// Inject a signal from the object at `path`.
    pub fn inject_signal(&self, path: &ObjectPath, member: &str, args: Value) {
        self.inject(json!({ "path": path, "member": member, "args": args }));
    }

    /// Inject one property-change batch from the object at `path`.
    pub fn inject_properties_changed(&self, path: &ObjectPath, changes: Value) {
        self.inject_signal(path, member::PROPERTIES_CHANGED, changes);
    }

    /// Take all sent messages, clearing the buffer.
    pub fn take_sent(&self) -> Vec<Value> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Await the next outbound message.
    pub async fn next_request(&self) -> Option<Value> {
        self.request_rx.lock().await.recv().await
    }
}

struct FakeSender {
    sent: Arc<parking_lot::Mutex<Vec<Value>>>,
    request_tx: mpsc::UnboundedSender<Value>,
}

impl Transport for FakeSender {
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.sent.lock().push(message.clone());
        let _ = self.request_tx.send(message);
        Box::pin(async move { Ok(()) })
    }
}

struct FakeReceiver {
    inbound_rx: mpsc::UnboundedReceiver<Value>,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for FakeReceiver {
    fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            while let Some(message) = self.inbound_rx.recv().await {
                if self.message_tx.send(message).is_err() {
                    break;
                }
            }
            Ok(())
        })
    }
}

/// Outcome of the next scripted `EnrollDevice` call.
pub enum EnrollOutcome {
    Succeed,
    Fail { name: String, message: String },
}

impl EnrollOutcome {
    pub fn fail(name: &str, message: &str) -> Self {
        EnrollOutcome::Fail {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

struct PendingEnroll {
    id: u32,
    uid: String,
    policy: String,
}

/// In-memory emulation of the device-management service.
pub struct FakeBolt {
    controller: FakeBusController,
    objects: parking_lot::Mutex<HashMap<ObjectPath, HashMap<String, Value>>>,
    enroll_script: parking_lot::Mutex<VecDeque<EnrollOutcome>>,
    enroll_calls: parking_lot::Mutex<Vec<String>>,
    held: parking_lot::Mutex<Option<VecDeque<PendingEnroll>>>,
    next_device: AtomicU32,
}

impl FakeBolt {
    /// Spin up a fake service and return transport parts to connect to it.
    ///
    /// The manager object starts with `Version 1`, `Probing false` and
    /// `AuthMode "enabled"`.
    pub fn start() -> (TransportParts, Arc<FakeBolt>) {
        let (parts, controller) = FakeTransportBuilder::new().build();

        let mut objects = HashMap::new();
        objects.insert(
            ObjectPath::manager(),
            HashMap::from([
                (prop::VERSION.to_string(), json!(1)),
                (prop::PROBING.to_string(), json!(false)),
                (prop::AUTH_MODE.to_string(), json!("enabled")),
            ]),
        );

        let bolt = Arc::new(FakeBolt {
            controller,
            objects: parking_lot::Mutex::new(objects),
            enroll_script: parking_lot::Mutex::new(VecDeque::new()),
            enroll_calls: parking_lot::Mutex::new(Vec::new()),
            held: parking_lot::Mutex::new(None),
            next_device: AtomicU32::new(0),
        });

        tokio::spawn({
            let bolt = Arc::clone(&bolt);
            async move { bolt.serve().await }
        });

        (parts, bolt)
    }

    /// Update a manager property and emit one property-change batch.
    pub fn set_manager_property(&self, name: &str, value: Value) {
        let path = ObjectPath::manager();
        self.objects
            .lock()
            .get_mut(&path)
            .expect("manager object always exists")
            .insert(name.to_string(), value.clone());
        self.controller
            .inject_properties_changed(&path, json!({ name: value }));
    }

    /// Register a new device object and emit `DeviceAdded` for it.
    pub fn plug_device(&self, uid: &str, status: Status) -> ObjectPath {
        let n = self.next_device.fetch_add(1, Ordering::SeqCst);
        let path = ObjectPath::new(format!("/org/freedesktop/bolt/devices/{n}"));

        let properties = HashMap::from([
            (prop::UID.to_string(), json!(uid)),
            (prop::NAME.to_string(), json!(format!("Fake Device {n}"))),
            (prop::VENDOR.to_string(), json!("ACME")),
            (prop::TYPE.to_string(), json!("peripheral")),
            (prop::STATUS.to_string(), json!(status.as_str())),
            (prop::PARENT.to_string(), json!("")),
            (
                prop::SYSFS_PATH.to_string(),
                json!(format!("/sys/bus/thunderbolt/devices/0-{n}")),
            ),
            (prop::STORED.to_string(), json!(false)),
            (prop::POLICY.to_string(), json!("default")),
            (prop::KEY.to_string(), json!("")),
            (prop::LABEL.to_string(), json!("")),
            (prop::CONNECT_TIME.to_string(), json!(1_700_000_000 + u64::from(n))),
            (prop::AUTHORIZE_TIME.to_string(), json!(0)),
            (prop::STORE_TIME.to_string(), json!(0)),
        ]);
        self.objects.lock().insert(path.clone(), properties);

        self.controller
            .inject_signal(&ObjectPath::manager(), member::DEVICE_ADDED, json!(path));
        path
    }

    /// Re-announce an existing device path.
    pub fn replug(&self, path: &ObjectPath) {
        self.controller
            .inject_signal(&ObjectPath::manager(), member::DEVICE_ADDED, json!(path));
    }

    /// Script the outcome of the next unscripted `EnrollDevice` call.
    /// Unscripted calls succeed.
    pub fn script_enroll(&self, outcome: EnrollOutcome) {
        self.enroll_script.lock().push_back(outcome);
    }

    /// Hold `EnrollDevice` replies back until released one by one.
    pub fn hold_enrolls(&self) {
        *self.held.lock() = Some(VecDeque::new());
    }

    /// Number of enroll calls currently held without a reply.
    pub fn held_enrolls(&self) -> usize {
        self.held.lock().as_ref().map_or(0, VecDeque::len)
    }

    /// Reply to the oldest held enroll call. Returns `false` when none is
    /// held.
    pub fn release_enroll(&self) -> bool {
        let pending = self.held.lock().as_mut().and_then(VecDeque::pop_front);
        match pending {
            Some(pending) => {
                self.resolve_enroll(pending);
                true
            }
            None => false,
        }
    }

    /// Stop holding enroll replies and answer everything still held.
    pub fn resume_enrolls(&self) {
        let drained = self.held.lock().take();
        if let Some(drained) = drained {
            for pending in drained {
                self.resolve_enroll(pending);
            }
        }
    }

    /// Uids of every `EnrollDevice` call received, in arrival order.
    pub fn enroll_calls(&self) -> Vec<String> {
        self.enroll_calls.lock().clone()
    }

    /// Cached property of an object, as the service sees it.
    pub fn property(&self, path: &ObjectPath, name: &str) -> Option<Value> {
        self.objects.lock().get(path)?.get(name).cloned()
    }

    pub fn controller(&self) -> &FakeBusController {
        &self.controller
    }

    async fn serve(self: Arc<Self>) {
        while let Some(message) = self.controller.next_request().await {
            let call: MethodCall = match serde_json::from_value(message) {
                Ok(call) => call,
                Err(_) => continue,
            };
            self.handle(call);
        }
    }

    fn handle(&self, call: MethodCall) {
        match call.method.as_str() {
            member::GET_ALL => match self.objects.lock().get(&call.path) {
                Some(properties) => {
                    self.controller.inject_reply(call.id, json!(properties));
                }
                None => self.controller.inject_error(
                    call.id,
                    "UnknownObject",
                    &format!("no object at {}", call.path),
                ),
            },

            member::LIST_DEVICES => {
                let manager = ObjectPath::manager();
                let mut paths: Vec<String> = self
                    .objects
                    .lock()
                    .keys()
                    .filter(|path| **path != manager)
                    .map(|path| path.as_str().to_string())
                    .collect();
                paths.sort();
                self.controller.inject_reply(call.id, json!(paths));
            }

            member::DEVICE_BY_UID => {
                let uid = call.args["uid"].as_str().unwrap_or_default().to_string();
                match self.path_by_uid(&uid) {
                    Some(path) => self.controller.inject_reply(call.id, json!(path)),
                    None => self.controller.inject_error(
                        call.id,
                        "NotFound",
                        &format!("no device with uid {uid}"),
                    ),
                }
            }

            member::ENROLL_DEVICE => {
                let uid = call.args["uid"].as_str().unwrap_or_default().to_string();
                let policy = call.args["policy"].as_str().unwrap_or("default").to_string();
                self.enroll_calls.lock().push(uid.clone());

                let pending = PendingEnroll {
                    id: call.id,
                    uid,
                    policy,
                };
                let pending = {
                    let mut held = self.held.lock();
                    match held.as_mut() {
                        Some(queue) => {
                            queue.push_back(pending);
                            None
                        }
                        None => Some(pending),
                    }
                };
                if let Some(pending) = pending {
                    self.resolve_enroll(pending);
                }
            }

            member::FORGET_DEVICE => {
                let uid = call.args["uid"].as_str().unwrap_or_default().to_string();
                match self.path_by_uid(&uid) {
                    Some(path) => {
                        self.objects.lock().remove(&path);
                        self.controller.inject_signal(
                            &ObjectPath::manager(),
                            member::DEVICE_REMOVED,
                            json!(path),
                        );
                        self.controller.inject_reply(call.id, Value::Null);
                    }
                    None => self.controller.inject_error(
                        call.id,
                        "NotFound",
                        &format!("no device with uid {uid}"),
                    ),
                }
            }

            member::AUTHORIZE => {
                let authorized = {
                    let mut objects = self.objects.lock();
                    match objects.get_mut(&call.path) {
                        Some(properties) => {
                            properties.insert(
                                prop::STATUS.to_string(),
                                json!(Status::Authorized.as_str()),
                            );
                            true
                        }
                        None => false,
                    }
                };
                if authorized {
                    self.controller.inject_properties_changed(
                        &call.path,
                        json!({ prop::STATUS: Status::Authorized.as_str() }),
                    );
                    self.controller.inject_reply(call.id, Value::Null);
                } else {
                    self.controller.inject_error(
                        call.id,
                        "UnknownObject",
                        &format!("no object at {}", call.path),
                    );
                }
            }

            other => {
                self.controller.inject_error(
                    call.id,
                    "UnknownMethod",
                    &format!("no method {other}"),
                );
            }
        }
    }

    fn resolve_enroll(&self, pending: PendingEnroll) {
        let outcome = self
            .enroll_script
            .lock()
            .pop_front()
            .unwrap_or(EnrollOutcome::Succeed);

        match outcome {
            EnrollOutcome::Fail { name, message } => {
                self.controller.inject_error(pending.id, &name, &message);
            }
            EnrollOutcome::Succeed => {
                let Some(path) = self.path_by_uid(&pending.uid) else {
                    self.controller.inject_error(
                        pending.id,
                        "NotFound",
                        &format!("no device with uid {}", pending.uid),
                    );
                    return;
                };

                let changes = json!({
                    prop::STATUS: Status::Authorized.as_str(),
                    prop::STORED: true,
                    prop::POLICY: pending.policy,
                });
                {
                    let mut objects = self.objects.lock();
                    let properties = objects.get_mut(&path).expect("looked up just above");
                    for (name, value) in changes.as_object().expect("literal object") {
                        properties.insert(name.clone(), value.clone());
                    }
                }
                self.controller.inject_properties_changed(&path, changes);
                self.controller.inject_reply(pending.id, json!(path));
            }
        }
    }

    fn path_by_uid(&self, uid: &str) -> Option<ObjectPath> {
        self.objects
            .lock()
            .iter()
            .find(|(_, properties)| properties.get(prop::UID).and_then(Value::as_str) == Some(uid))
            .map(|(path, _)| path.clone())
    }
}
