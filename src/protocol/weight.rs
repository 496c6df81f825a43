//! Weight notification decoding.
//!
//! Two payload shapes exist in the field:
//! - Current firmware: a bare decimal in kg, e.g. `1.250`
//! - Legacy firmware: `WEIGHT:<value>:<unit>:<status>`
//!
//! Anything else decodes to a zero, unstable sample.

use crate::data::{WeightSample, WeightUnit};
use crate::protocol::commands::decode_text;

/// Capacity of the scale in kg. Bare readings above it are flagged as overload.
pub const MAX_WEIGHT_KG: f64 = 300.0;

/// Decode a weight notification payload.
///
/// This never fails; unrecognised payloads produce [`WeightSample::zero`].
pub fn decode_weight(data: &[u8]) -> WeightSample {
    parse_weight_text(&decode_text(data))
}

/// Decode a weight notification that was already converted to text.
///
/// # Example
///
/// ```
/// use kgiton_rust_ble::data::WeightUnit;
/// use kgiton_rust_ble::protocol::parse_weight_text;
///
/// let sample = parse_weight_text("1.250");
/// assert_eq!(sample.value, 1.25);
/// assert_eq!(sample.unit, WeightUnit::Kilogram);
/// assert!(sample.is_stable);
/// ```
pub fn parse_weight_text(text: &str) -> WeightSample {
    let text = text.trim();

    if !text.contains(':') {
        if let Ok(value) = text.parse::<f64>() {
            if value.is_finite() {
                return WeightSample::new(value, WeightUnit::Kilogram, true, value > MAX_WEIGHT_KG);
            }
        }
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() >= 4 && parts[0] == "WEIGHT" {
        let value = parts[1]
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);
        let unit = WeightUnit::from_token(parts[2]).unwrap_or_default();
        let status = parts[3].trim().to_ascii_uppercase();
        return WeightSample::new(value, unit, status == "STABLE", status == "OVERLOAD");
    }

    WeightSample::zero()
}
