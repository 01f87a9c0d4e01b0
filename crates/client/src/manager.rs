//! Client for the manager object.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bolt_protocol::{AuthFlags, AuthMode, ObjectPath, Policy, member, prop};
use serde_json::{Value, json};

use crate::connection::Connection;
use crate::device::Device;
use crate::error::Result;
use crate::events::{Listeners, Subscription};
use crate::remote_object::RemoteObject;

/// Client-side mirror of the single manager object.
///
/// Construct one per consumer lifetime with [`connect`](Self::connect); tear
/// it down with [`close`](Self::close) at most once.
pub struct ManagerClient {
    connection: Arc<Connection>,
    object: Arc<RemoteObject>,
    /// Last seen value of the manager's `Probing` property.
    probing: Arc<AtomicBool>,
    device_added: Listeners<Device>,
    probing_changed: Listeners<bool>,
    subs: parking_lot::Mutex<Vec<Subscription>>,
}

impl ManagerClient {
    /// Bind the manager object and wire up its signals.
    ///
    /// Resolves exactly once, after which the client is usable; a failure is
    /// a connection error and the caller may retry by connecting again.
    pub async fn connect(connection: Arc<Connection>) -> Result<Arc<ManagerClient>> {
        let object = RemoteObject::bind(&connection, ObjectPath::manager()).await?;

        let probing = Arc::new(AtomicBool::new(
            object.get_bool(prop::PROBING).unwrap_or(false),
        ));
        let device_added = Listeners::new();
        let probing_changed = Listeners::new();
        let mut subs = Vec::new();

        // A new device path: bind a mirror for it and republish it as a
        // higher-level event. No deduplication - if the same path is
        // signaled twice, two events fire.
        subs.push(object.on_signal(member::DEVICE_ADDED, {
            let connection = Arc::clone(&connection);
            let device_added = device_added.clone();
            move |args| {
                let Some(path) = args.as_str().map(ObjectPath::new) else {
                    tracing::debug!("DeviceAdded signal without a path, ignoring");
                    return;
                };
                let connection = Arc::clone(&connection);
                let device_added = device_added.clone();
                tokio::spawn(async move {
                    match Device::bind(&connection, path).await {
                        Ok(device) => {
                            tracing::debug!(uid = %device.uid(), "device added");
                            device_added.emit(&device);
                        }
                        // Fatal to that handle only; the device is dropped.
                        Err(e) => tracing::debug!("failed to bind added device: {e}"),
                    }
                });
            }
        }));

        // Track the derived probing flag; notify only on actual changes.
        subs.push(object.on_properties_changed({
            let probing = Arc::clone(&probing);
            let probing_changed = probing_changed.clone();
            move |changes| {
                if let Some(value) = changes.get(prop::PROBING).and_then(Value::as_bool) {
                    let previous = probing.swap(value, Ordering::SeqCst);
                    if previous != value {
                        probing_changed.emit(&value);
                    }
                }
            }
        }));

        tracing::debug!("manager client connected");
        Ok(Arc::new(ManagerClient {
            connection,
            object,
            probing,
            device_added,
            probing_changed,
            subs: parking_lot::Mutex::new(subs),
        }))
    }

    /// Whether the service is actively scanning for devices.
    pub fn probing(&self) -> bool {
        self.probing.load(Ordering::SeqCst)
    }

    /// The service's authorization-mode token set.
    ///
    /// Read through the handle's cache; there is no change event for it by
    /// design - callers needing live updates must poll.
    pub fn auth_mode(&self) -> AuthMode {
        AuthMode::new(self.object.get_str(prop::AUTH_MODE).unwrap_or_default())
    }

    pub fn version(&self) -> u64 {
        self.object.get_u64(prop::VERSION).unwrap_or(0)
    }

    /// Ask the service to enroll the device with `uid` under `policy`.
    ///
    /// The authorization-flags argument is reserved for future use and is
    /// always sent as the none value. On success the returned [`Device`] is
    /// freshly bound for the path the service assigned. Concurrent calls are
    /// permitted; serialization is the enrollment queue's responsibility,
    /// not this client's.
    pub async fn enroll_device(&self, uid: &str, policy: Policy) -> Result<Device> {
        let result = self
            .object
            .call(
                member::ENROLL_DEVICE,
                json!({ "uid": uid, "policy": policy, "flags": AuthFlags::None }),
            )
            .await?;
        let path: ObjectPath = serde_json::from_value(result)?;
        Device::bind(&self.connection, path).await
    }

    /// All devices the service currently knows about.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let result = self.object.call(member::LIST_DEVICES, Value::Null).await?;
        let paths: Vec<ObjectPath> = serde_json::from_value(result)?;
        let mut devices = Vec::with_capacity(paths.len());
        for path in paths {
            devices.push(Device::bind(&self.connection, path).await?);
        }
        Ok(devices)
    }

    /// Look a device up by its stable uid.
    pub async fn device_by_uid(&self, uid: &str) -> Result<Device> {
        let result = self
            .object
            .call(member::DEVICE_BY_UID, json!({ "uid": uid }))
            .await?;
        let path: ObjectPath = serde_json::from_value(result)?;
        Device::bind(&self.connection, path).await
    }

    /// Remove the device with `uid` from the service's store.
    pub async fn forget_device(&self, uid: &str) -> Result<()> {
        self.object
            .call(member::FORGET_DEVICE, json!({ "uid": uid }))
            .await?;
        Ok(())
    }

    /// Listen for newly added devices.
    pub fn on_device_added(
        &self,
        listener: impl Fn(&Device) + Send + Sync + 'static,
    ) -> Subscription {
        self.device_added.subscribe(listener)
    }

    /// Listen for changes of the probing flag.
    ///
    /// Fires with the new value whenever, and only when, the underlying
    /// property actually changes.
    pub fn on_probing_changed(
        &self,
        listener: impl Fn(&bool) + Send + Sync + 'static,
    ) -> Subscription {
        self.probing_changed.subscribe(listener)
    }

    /// Detach all listeners and release the manager handle.
    ///
    /// Call at most once; the client must not be used afterwards.
    pub fn close(&self) {
        self.subs.lock().clear();
        self.device_added.clear();
        self.probing_changed.clear();
        self.object.release();
        tracing::debug!("manager client closed");
    }
}

impl std::fmt::Debug for ManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerClient")
            .field("probing", &self.probing())
            .field("auth_mode", &self.auth_mode().as_str())
            .finish()
    }
}
