//! BLE Service and Characteristic UUIDs.
//!
//! Contains the GATT layout exposed by KGiTON scale firmware.

use uuid::Uuid;

// Scale Service (KGiTON Custom)
/// KGiTON scale service UUID.
pub const SCALE_SERVICE_UUID: Uuid = Uuid::from_u128(0x1234_5678_1234_1234_1234_123456789abc);

/// Weight characteristic UUID (Notify).
///
/// Carries weight readings as ASCII text.
pub const WEIGHT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd_1234_1234_1234_1234_123456789abc);

/// Control characteristic UUID (Write, Notify).
///
/// Commands are written here and their responses arrive as notifications.
pub const CONTROL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd_0002_1234_1234_1234_123456789abc);

/// Legacy authentication characteristic UUID.
pub const AUTH_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd_0001_1234_1234_1234_123456789abc);

/// Legacy buzzer characteristic UUID.
pub const BUZZER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd_9999_1234_1234_1234_123456789abc);

/// Name fragment advertised by KGiTON scales.
pub const DEVICE_NAME_PREFIX: &str = "KGiTON";

/// Check if an advertised name belongs to a KGiTON scale.
///
/// The comparison is a case-insensitive substring match.
pub fn matches_device_name(name: &str, fragment: &str) -> bool {
    name.to_lowercase().contains(&fragment.to_lowercase())
}

/// Check if a service UUID is the KGiTON scale service.
pub fn is_scale_service(uuid: &Uuid) -> bool {
    *uuid == SCALE_SERVICE_UUID
}
