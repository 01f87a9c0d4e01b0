//! Domain types shared by the manager and device interfaces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Well-known bus name of the device-management service.
pub const SERVICE_NAME: &str = "org.freedesktop.bolt";

/// Fixed path of the single manager object.
pub const MANAGER_PATH: &str = "/org/freedesktop/bolt";

/// Opaque, stable identifier of a remote object.
///
/// Unique per remote object for its lifetime. Distinct from a device's `Uid`,
/// which identifies the physical device across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of the manager object.
    pub fn manager() -> Self {
        Self::new(MANAGER_PATH)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Signal and method member names.
pub mod member {
    pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
    pub const DEVICE_ADDED: &str = "DeviceAdded";
    pub const DEVICE_REMOVED: &str = "DeviceRemoved";

    pub const GET_ALL: &str = "GetAll";
    pub const LIST_DEVICES: &str = "ListDevices";
    pub const DEVICE_BY_UID: &str = "DeviceByUid";
    pub const ENROLL_DEVICE: &str = "EnrollDevice";
    pub const FORGET_DEVICE: &str = "ForgetDevice";
    pub const AUTHORIZE: &str = "Authorize";
}

/// Property names exposed by the manager and device objects.
pub mod prop {
    // Manager properties.
    pub const VERSION: &str = "Version";
    pub const PROBING: &str = "Probing";
    pub const AUTH_MODE: &str = "AuthMode";

    // Device properties.
    pub const UID: &str = "Uid";
    pub const NAME: &str = "Name";
    pub const VENDOR: &str = "Vendor";
    pub const TYPE: &str = "Type";
    pub const STATUS: &str = "Status";
    pub const PARENT: &str = "Parent";
    pub const SYSFS_PATH: &str = "SysfsPath";
    pub const STORED: &str = "Stored";
    pub const POLICY: &str = "Policy";
    pub const KEY: &str = "Key";
    pub const LABEL: &str = "Label";
    pub const CONNECT_TIME: &str = "ConnectTime";
    pub const AUTHORIZE_TIME: &str = "AuthorizeTime";
    pub const STORE_TIME: &str = "StoreTime";
}

/// Connection and authorization state of a device.
///
/// Authoritative at read time only: it can change concurrently due to
/// independent remote activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Disconnected,
    Connected,
    Authorizing,
    AuthError,
    Authorized,
    AuthorizedSecure,
    AuthorizedNewkey,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Disconnected => "disconnected",
            Status::Connected => "connected",
            Status::Authorizing => "authorizing",
            Status::AuthError => "auth-error",
            Status::Authorized => "authorized",
            Status::AuthorizedSecure => "authorized-secure",
            Status::AuthorizedNewkey => "authorized-newkey",
        }
    }

    /// `true` for every authorized variant.
    pub fn is_authorized(self) -> bool {
        matches!(
            self,
            Status::Authorized | Status::AuthorizedSecure | Status::AuthorizedNewkey
        )
    }
}

impl FromStr for Status {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Status::Disconnected),
            "connected" => Ok(Status::Connected),
            "authorizing" => Ok(Status::Authorizing),
            "auth-error" => Ok(Status::AuthError),
            "authorized" => Ok(Status::Authorized),
            "authorized-secure" => Ok(Status::AuthorizedSecure),
            "authorized-newkey" => Ok(Status::AuthorizedNewkey),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-device setting controlling whether future connections require manual
/// approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    Default,
    Manual,
    Auto,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Default => "default",
            Policy::Manual => "manual",
            Policy::Auto => "auto",
        }
    }
}

impl FromStr for Policy {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Policy::Default),
            "manual" => Ok(Policy::Manual),
            "auto" => Ok(Policy::Auto),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization flags passed to `EnrollDevice` and `Authorize`.
///
/// Reserved for future use; clients currently always send [`AuthFlags::None`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthFlags {
    #[default]
    None,
}

/// Service-wide authorization-mode capability string.
///
/// A pipe-delimited token set, e.g. `"enabled|secure"`. Authorization
/// attempts are only meaningful while the [`enabled`](Self::is_enabled)
/// token is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthMode(String);

impl AuthMode {
    pub const TOKEN_ENABLED: &'static str = "enabled";

    pub fn new(mode: impl Into<String>) -> Self {
        Self(mode.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split('|').filter(|token| !token.is_empty())
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.tokens().any(|t| t == token)
    }

    /// Whether the service will accept authorization attempts at all.
    pub fn is_enabled(&self) -> bool {
        self.has_token(Self::TOKEN_ENABLED)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when parsing an unrecognized enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value: {}", self.0)
    }
}

impl std::error::Error for UnknownValue {}
