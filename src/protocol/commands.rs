//! Control commands and their wire encoding.
//!
//! Commands are plain ASCII tokens written to the control characteristic:
//! - Plain: `TARE`, `BUZZ`, `OFF`, `LONG`, `UNIT:KG`, `UNIT:LB`, `CAL:START`, `CAL:END`
//! - Parameterised: `CAL:SET:<weight>`, `CONNECT:<licenseKey>`, `DISCONNECT:<licenseKey>`

use bytes::Bytes;

use crate::data::WeightUnit;
use crate::error::{Error, Result};

/// Buzzer patterns understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuzzerMode {
    /// Short beep (`BUZZ`).
    Beep,
    /// Long beep (`LONG`).
    Long,
    /// Silence the buzzer (`OFF`).
    Off,
}

/// A command for the scale's control characteristic.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScaleCommand {
    /// Zero the scale.
    Tare,
    /// Drive the buzzer.
    Buzzer(BuzzerMode),
    /// Switch the display unit. Only kg and lb exist on the firmware.
    SetUnit(WeightUnit),
    /// Enter calibration mode.
    CalibrationStart,
    /// Set the reference weight (kg) placed on the scale during calibration.
    CalibrationSet(f64),
    /// Leave calibration mode and store the result.
    CalibrationEnd,
    /// Authorize the session with a license key.
    Connect(String),
    /// Revoke the session's license authorization.
    Disconnect(String),
    /// A raw token sent as-is.
    Custom(String),
}

impl ScaleCommand {
    /// Build an authorization command, trimming the license key.
    pub fn connect(license_key: &str) -> Result<Self> {
        Ok(Self::Connect(normalize_license_key(license_key)?))
    }

    /// Build a deauthorization command, trimming the license key.
    pub fn disconnect(license_key: &str) -> Result<Self> {
        Ok(Self::Disconnect(normalize_license_key(license_key)?))
    }

    /// Get the command as its wire token.
    pub fn to_wire(&self) -> Result<String> {
        let token = match self {
            Self::Tare => "TARE".to_string(),
            Self::Buzzer(BuzzerMode::Beep) => "BUZZ".to_string(),
            Self::Buzzer(BuzzerMode::Long) => "LONG".to_string(),
            Self::Buzzer(BuzzerMode::Off) => "OFF".to_string(),
            Self::SetUnit(WeightUnit::Kilogram) => "UNIT:KG".to_string(),
            Self::SetUnit(WeightUnit::Pound) => "UNIT:LB".to_string(),
            Self::SetUnit(unit @ WeightUnit::Gram) => {
                return Err(Error::invalid_parameter("unit", unit));
            }
            Self::CalibrationStart => "CAL:START".to_string(),
            Self::CalibrationSet(weight) => {
                if !weight.is_finite() || *weight <= 0.0 {
                    return Err(Error::invalid_parameter("calibration_weight", weight));
                }
                format!("CAL:SET:{}", weight)
            }
            Self::CalibrationEnd => "CAL:END".to_string(),
            Self::Connect(key) => format!("CONNECT:{}", normalize_license_key(key)?),
            Self::Disconnect(key) => format!("DISCONNECT:{}", normalize_license_key(key)?),
            Self::Custom(raw) => raw.trim().to_string(),
        };

        if token.is_empty() {
            return Err(Error::invalid_parameter("command", "<empty>"));
        }
        if !token.is_ascii() {
            return Err(Error::invalid_parameter("command", token));
        }
        Ok(token)
    }

    /// Encode the command to the bytes written on the control characteristic.
    pub fn encode(&self) -> Result<Bytes> {
        self.to_wire().map(Bytes::from)
    }

    /// Get a short label for logs that never includes the license key.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tare => "TARE",
            Self::Buzzer(BuzzerMode::Beep) => "BUZZ",
            Self::Buzzer(BuzzerMode::Long) => "LONG",
            Self::Buzzer(BuzzerMode::Off) => "OFF",
            Self::SetUnit(_) => "UNIT",
            Self::CalibrationStart => "CAL:START",
            Self::CalibrationSet(_) => "CAL:SET",
            Self::CalibrationEnd => "CAL:END",
            Self::Connect(_) => "CONNECT",
            Self::Disconnect(_) => "DISCONNECT",
            Self::Custom(_) => "CUSTOM",
        }
    }
}

fn normalize_license_key(key: &str) -> Result<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_parameter("license_key", "<empty>"));
    }
    Ok(trimmed.to_string())
}

/// Decode notification bytes into text.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
pub fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
