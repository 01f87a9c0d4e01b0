//! Error types for the bolt client.
//!
//! Three failure classes exist and all of them are local: binding a remote
//! object can fail (fatal to that handle only), a method call can fail
//! (surfaced per call), and the transport can go away. No error here is ever
//! fatal to the process.

use bolt_protocol::{CallError, ObjectPath};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to establish the mirror of a remote object.
    ///
    /// Fatal to that handle only; the caller may retry by binding again.
    #[error("failed to bind {path}: {message}")]
    Bind { path: ObjectPath, message: String },

    /// A remote method call failed.
    ///
    /// `Display` is the service's message verbatim, with transport-specific
    /// wrapping stripped, so it can be shown to a user as-is.
    #[error("{message}")]
    Call {
        /// Machine-readable error identifier, when the service provided one.
        name: Option<String>,
        message: String,
    },

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection closed before a reply arrived.
    #[error("connection closed")]
    ChannelClosed,

    /// The peer sent something this client cannot make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn from_call_error(error: CallError) -> Self {
        Error::Call {
            name: error.name,
            message: error.message,
        }
    }

    /// `true` when this is a per-call failure reported by the service.
    pub fn is_call(&self) -> bool {
        matches!(self, Error::Call { .. })
    }

    /// The service's error identifier, if any.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            Error::Call { name, .. } => name.as_deref(),
            _ => None,
        }
    }
}
