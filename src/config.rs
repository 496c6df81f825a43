//! Scale service configuration.

use std::time::Duration;

use crate::ble::reconnect::ReconnectPolicy;
use crate::ble::uuids::DEVICE_NAME_PREFIX;

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Default bound on link establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Default wait for a control response before assuming success.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(3_000);
/// Default delay before each reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3_000);
/// Default number of reconnect attempts after an unexpected disconnect.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Configuration for a [`crate::ScaleService`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kgiton_rust_ble::ScaleConfig;
///
/// let config = ScaleConfig::default()
///     .with_command_timeout(Duration::from_secs(5))
///     .with_auto_reconnect(false);
/// assert_eq!(config.reconnect.max_attempts, 5);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleConfig {
    /// Name fragment used to recognise scales while scanning.
    pub device_name_prefix: String,

    /// Default scan duration.
    pub scan_timeout: Duration,

    /// Bound on establishing the link.
    pub connect_timeout: Duration,

    /// Wait for a control response before assuming success.
    pub command_timeout: Duration,

    /// Reconnect attempts and delay after an unexpected disconnect.
    pub reconnect: ReconnectPolicy,

    /// Whether unexpected disconnects trigger reconnects.
    pub auto_reconnect: bool,

    /// Consecutive transient scan errors tolerated before a scan fails.
    pub max_consecutive_scan_errors: u32,

    /// MTU requested after connecting. `None` skips negotiation.
    pub requested_mtu: Option<u16>,

    /// How long `initialize` waits for the adapter to power on.
    pub power_on_timeout: Duration,

    /// Capacity of the broadcast channels handed to subscribers.
    pub event_capacity: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            device_name_prefix: DEVICE_NAME_PREFIX.to_string(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            auto_reconnect: true,
            max_consecutive_scan_errors: 3,
            requested_mtu: Some(512),
            power_on_timeout: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

impl ScaleConfig {
    /// Set the name fragment used while scanning.
    pub fn with_device_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_name_prefix = prefix.into();
        self
    }

    /// Set the default scan duration.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the link establishment bound.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the control response wait.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Enable or disable automatic reconnects.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the requested MTU.
    pub fn with_requested_mtu(mut self, mtu: Option<u16>) -> Self {
        self.requested_mtu = mtu;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScaleConfig::default();
        assert_eq!(config.device_name_prefix, "KGiTON");
        assert_eq!(config.scan_timeout, Duration::from_millis(15_000));
        assert_eq!(config.connect_timeout, Duration::from_millis(15_000));
        assert_eq!(config.command_timeout, Duration::from_millis(3_000));
        assert_eq!(config.reconnect.delay, Duration::from_millis(3_000));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.max_consecutive_scan_errors, 3);
        assert!(config.auto_reconnect);
    }

    #[test]
    fn test_builders() {
        let config = ScaleConfig::default()
            .with_device_name_prefix("SCALE")
            .with_requested_mtu(None)
            .with_reconnect(ReconnectPolicy::new(2, Duration::from_secs(1)));
        assert_eq!(config.device_name_prefix, "SCALE");
        assert_eq!(config.requested_mtu, None);
        assert_eq!(config.reconnect.max_attempts, 2);
    }
}
