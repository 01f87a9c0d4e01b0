//! Typed view over a device's remote object.

use std::sync::Arc;

use bolt_protocol::{AuthFlags, ObjectPath, Policy, Status, member, prop};
use serde_json::json;

use crate::connection::Connection;
use crate::error::Result;
use crate::events::Subscription;
use crate::remote_object::RemoteObject;

/// One physical device known to the service.
///
/// A `Device` is a semantic view over a [`RemoteObject`]; accessors read the
/// cached property snapshot and never block. [`status`](Self::status) is
/// authoritative at read time only - it can change concurrently due to
/// independent remote activity.
#[derive(Clone)]
pub struct Device {
    object: Arc<RemoteObject>,
}

impl Device {
    /// Bind the device object at `path`.
    pub async fn bind(connection: &Arc<Connection>, path: ObjectPath) -> Result<Device> {
        let object = RemoteObject::bind(connection, path).await?;
        Ok(Device { object })
    }

    pub fn path(&self) -> &ObjectPath {
        self.object.path()
    }

    pub fn object(&self) -> &Arc<RemoteObject> {
        &self.object
    }

    /// Stable cross-session device identity; distinct from [`path`](Self::path).
    pub fn uid(&self) -> String {
        self.string_prop(prop::UID)
    }

    pub fn name(&self) -> String {
        self.string_prop(prop::NAME)
    }

    pub fn vendor(&self) -> String {
        self.string_prop(prop::VENDOR)
    }

    pub fn device_type(&self) -> String {
        self.string_prop(prop::TYPE)
    }

    pub fn label(&self) -> String {
        self.string_prop(prop::LABEL)
    }

    pub fn key(&self) -> String {
        self.string_prop(prop::KEY)
    }

    pub fn sysfs_path(&self) -> String {
        self.string_prop(prop::SYSFS_PATH)
    }

    pub fn parent(&self) -> Option<String> {
        self.object.get_str(prop::PARENT).filter(|p| !p.is_empty())
    }

    /// Current status snapshot; `Disconnected` when the property is missing
    /// or unrecognized.
    pub fn status(&self) -> Status {
        self.object
            .get_str(prop::STATUS)
            .and_then(|s| s.parse().ok())
            .unwrap_or(Status::Disconnected)
    }

    pub fn policy(&self) -> Policy {
        self.object
            .get_str(prop::POLICY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(Policy::Default)
    }

    /// Whether the service has the device in its store.
    pub fn stored(&self) -> bool {
        self.object.get_bool(prop::STORED).unwrap_or(false)
    }

    pub fn connect_time(&self) -> u64 {
        self.object.get_u64(prop::CONNECT_TIME).unwrap_or(0)
    }

    pub fn authorize_time(&self) -> u64 {
        self.object.get_u64(prop::AUTHORIZE_TIME).unwrap_or(0)
    }

    pub fn store_time(&self) -> u64 {
        self.object.get_u64(prop::STORE_TIME).unwrap_or(0)
    }

    /// Ask the service to authorize this device.
    pub async fn authorize(&self, flags: AuthFlags) -> Result<()> {
        self.object
            .call(member::AUTHORIZE, json!({ "flags": flags }))
            .await?;
        Ok(())
    }

    /// Listen for property-change batches on this device.
    pub fn on_changed(
        &self,
        listener: impl Fn(&std::collections::HashMap<String, serde_json::Value>) + Send + Sync + 'static,
    ) -> Subscription {
        self.object.on_properties_changed(listener)
    }

    /// Release the underlying handle; the device must not be used afterwards.
    pub fn release(&self) {
        self.object.release();
    }

    fn string_prop(&self, name: &str) -> String {
        self.object.get_str(name).unwrap_or_default()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("path", self.path())
            .field("uid", &self.uid())
            .field("status", &self.status())
            .finish()
    }
}
