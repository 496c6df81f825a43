//! Error types for the kgiton-rust-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available, unsupported, or stayed powered off.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The service was used before [`crate::ScaleService::initialize`] succeeded.
    #[error("Scale service not initialized")]
    NotInitialized,

    /// The host refused the Bluetooth permissions the scale needs.
    #[error("Bluetooth permission denied: {reason}")]
    PermissionDenied {
        /// Description of the missing permission.
        reason: String,
    },

    /// The specified scale was not found.
    #[error("Scale not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but the scale is not connected.
    #[error("Scale not connected")]
    NotConnected,

    /// Failed to establish a connection to the scale.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection to the scale was lost while an operation was pending.
    #[error("Connection lost")]
    ConnectionLost,

    /// The scale rejected the license key.
    #[error("License rejected: {message}")]
    LicenseRejected {
        /// The message decoded from the scale's response.
        message: String,
    },

    /// A blocking step did not finish in time.
    #[error("Operation timed out")]
    Timeout,

    /// The requested operation is not supported.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },
}

impl Error {
    pub(crate) fn invalid_parameter(name: &str, value: impl ToString) -> Self {
        Error::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
