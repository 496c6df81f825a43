//! Radio abstraction.
//!
//! The scale service talks to the BLE stack only through [`BleTransport`]
//! and [`BleLink`]. [`crate::ble::platform::BtleplugTransport`] is the
//! default implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// Power state of the host adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    /// The adapter has not reported a state yet.
    Unknown,
    /// Radio is on.
    PoweredOn,
    /// Radio is off.
    PoweredOff,
    /// The host has no usable BLE support.
    Unsupported,
}

/// One advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Platform identifier of the peripheral.
    pub id: String,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Whether the peripheral accepts connections, when the platform knows.
    pub connectable: Option<bool>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

/// Class of a scan error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanErrorKind {
    /// A one-off radio hiccup.
    Transient,
    /// The adapter was switched off.
    PoweredOff,
    /// The host revoked the Bluetooth permission.
    Unauthorized,
    /// The adapter disappeared or is unsupported.
    Unavailable,
}

impl ScanErrorKind {
    /// Check if this error ends the scan regardless of the error budget.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transient)
    }
}

/// Error reported on a scan stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    /// Error class.
    pub kind: ScanErrorKind,
    /// Platform message.
    pub message: String,
}

impl ScanFailure {
    /// Create a scan failure.
    pub fn new(kind: ScanErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Parameters for a platform scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    /// Only report peripherals advertising one of these services. Empty means all.
    pub services: Vec<Uuid>,
}

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Bytes,
}

/// Stream of scan results. The stream ends when the platform stops reporting.
pub type ScanStream = BoxStream<'static, std::result::Result<Advertisement, ScanFailure>>;

/// Stream of notifications for every subscribed characteristic of a link.
pub type NotificationStream = BoxStream<'static, NotificationEvent>;

/// Host BLE adapter.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Get the current adapter power state.
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Start a platform scan.
    async fn start_scan(&self, request: ScanRequest) -> Result<ScanStream>;

    /// Stop the platform scan. Stopping when idle is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Establish a link to a peripheral seen during scanning.
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn BleLink>>;
}

/// An established link to one peripheral.
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Platform identifier of the peripheral.
    fn id(&self) -> &str;

    /// Advertised name of the peripheral, if known.
    fn name(&self) -> Option<String>;

    /// Discover services and verify the scale's characteristics are present.
    async fn discover(&self) -> Result<()>;

    /// Negotiate a larger MTU. Returns the granted size.
    async fn request_mtu(&self, mtu: u16) -> Result<u16>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Write a value to a characteristic.
    async fn write(&self, characteristic: Uuid, data: &[u8], with_response: bool) -> Result<()>;

    /// Get the stream of notifications for every subscribed characteristic.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Resolve once the link is gone, whoever closed it.
    async fn wait_disconnected(&self);

    /// Cancel the link.
    async fn disconnect(&self) -> Result<()>;
}
