//! Error types for the FlashArray block device adapter
//!
//! Provides the domain error taxonomy surfaced to callers together with the
//! typed array error contract returned by [`crate::domain::ArrayClient`]
//! implementations.

use thiserror::Error;

// =============================================================================
// Array Error Markers
// =============================================================================

/// Marker the array uses when an object (host, volume, connection) exists
const MSG_ALREADY_EXISTS: &str = "already exists";
/// Marker the array uses when an object is missing
const MSG_NOT_EXIST: &str = "does not exist";
/// Marker the array uses for volumes sitting in the destroyed (soft-delete) state
const MSG_PENDING_ERADICATION: &str = "has been destroyed";
/// Marker the array uses when a host/volume pair has no connection
const MSG_NOT_CONNECTED: &str = "is not connected";

// =============================================================================
// Array Errors
// =============================================================================

/// Typed error contract at the array client boundary
///
/// Adapters classify raw responses once so the lifecycle core never needs
/// to inspect response text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArrayError {
    #[error("Array object already exists: {message}")]
    AlreadyExists { message: String },

    #[error("Array object not found: {message}")]
    NotFound { message: String },

    #[error("Array volume pending eradication: {message}")]
    PendingEradication { message: String },

    #[error("Array host and volume are not connected: {message}")]
    NotConnected { message: String },

    #[error("Array request failed (status {status:?}): {message}")]
    Other { status: Option<u16>, message: String },
}

impl ArrayError {
    /// Classify an HTTP error response returned by the array
    ///
    /// Only `400 Bad Request` responses carry the well-known markers, every
    /// other status is reported as [`ArrayError::Other`].
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = body.trim().to_string();
        if status != 400 {
            return ArrayError::Other {
                status: Some(status),
                message,
            };
        }

        if message.contains(MSG_ALREADY_EXISTS) {
            ArrayError::AlreadyExists { message }
        } else if message.contains(MSG_NOT_EXIST) {
            ArrayError::NotFound { message }
        } else if message.contains(MSG_PENDING_ERADICATION) {
            ArrayError::PendingEradication { message }
        } else if message.contains(MSG_NOT_CONNECTED) {
            ArrayError::NotConnected { message }
        } else {
            ArrayError::Other {
                status: Some(status),
                message,
            }
        }
    }

    /// Error raised before any response was received
    pub fn transport(message: impl Into<String>) -> Self {
        ArrayError::Other {
            status: None,
            message: message.into(),
        }
    }

    /// HTTP status of the failed request, when one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ArrayError::Other { status, .. } => *status,
            _ => Some(400),
        }
    }

    /// True for "not found" and "pending eradication", both of which mean
    /// the volume is gone from the caller's point of view
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            ArrayError::NotFound { .. } | ArrayError::PendingEradication { .. }
        )
    }
}

// =============================================================================
// Adapter Errors
// =============================================================================

/// Unified error type for the adapter
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown storage protocol \"{0}\"")]
    UnknownStorageProtocol(String),

    // =========================================================================
    // Host Errors
    // =========================================================================
    #[error("Unable to find an existing array host with IQN or WWN for current host")]
    UnmanagedHostNotFound,

    // =========================================================================
    // Volume Errors
    // =========================================================================
    #[error("Unknown volume: {blockdevice_id}")]
    UnknownVolume { blockdevice_id: String },

    #[error("Volume already attached: {blockdevice_id}")]
    AlreadyAttachedVolume { blockdevice_id: String },

    #[error("Volume not attached: {blockdevice_id}")]
    UnattachedVolume { blockdevice_id: String },

    // =========================================================================
    // Adapter Errors
    // =========================================================================
    #[error(transparent)]
    Array(#[from] ArrayError),

    #[error("Initiator operation failed: {operation} - {reason}")]
    Initiator { operation: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a caller should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The instance cannot operate until configuration or environment is fixed
    Fatal,
    /// State mismatch the caller can act on (retry, skip, reconcile)
    Recoverable,
    /// An invariant the adapter relies on was violated
    Defect,
    /// Failure of an external collaborator, may succeed when retried
    Transient,
}

impl Error {
    pub(crate) fn unknown_volume(blockdevice_id: impl Into<String>) -> Self {
        Error::UnknownVolume {
            blockdevice_id: blockdevice_id.into(),
        }
    }

    pub(crate) fn already_attached(blockdevice_id: impl Into<String>) -> Self {
        Error::AlreadyAttachedVolume {
            blockdevice_id: blockdevice_id.into(),
        }
    }

    pub(crate) fn unattached(blockdevice_id: impl Into<String>) -> Self {
        Error::UnattachedVolume {
            blockdevice_id: blockdevice_id.into(),
        }
    }

    pub(crate) fn initiator(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Initiator {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) | Error::UnmanagedHostNotFound | Error::YamlParse(_) => {
                ErrorKind::Fatal
            }

            Error::UnknownVolume { .. }
            | Error::AlreadyAttachedVolume { .. }
            | Error::UnattachedVolume { .. } => ErrorKind::Recoverable,

            Error::UnknownStorageProtocol(_) | Error::Internal(_) => ErrorKind::Defect,

            Error::Array(_)
            | Error::Initiator { .. }
            | Error::Http(_)
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorKind::Transient,
        }
    }

    /// Check if the caller can act on this error without operator help
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Recoverable | ErrorKind::Transient)
    }
}

/// Result type alias for the adapter
pub type Result<T> = std::result::Result<T, Error>;
