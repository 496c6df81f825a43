//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy plumbing for discovering
//! KGiTON scales and talking to them over GATT.

pub mod connection;
pub(crate) mod correlator;
pub mod platform;
pub mod reconnect;
pub mod scanner;
pub mod session;
pub(crate) mod subscription;
pub mod transport;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use connection::{ConnectionState, ScaleConnectionState, StateCallback};
pub use platform::BtleplugTransport;
pub use reconnect::ReconnectPolicy;
pub use scanner::{DeviceCallback, ScanOptions};
pub use session::WeightCallback;
pub use transport::{
    AdapterState, Advertisement, BleLink, BleTransport, NotificationEvent, NotificationStream,
    ScanErrorKind, ScanFailure, ScanRequest, ScanStream,
};
pub use uuids::*;
