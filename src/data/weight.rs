//! Weight data structures.
//!
//! Contains the decoded weight sample and its unit.

use chrono::{DateTime, Utc};

use crate::utils::{g_to_kg, lb_to_kg};

/// Unit reported alongside a weight value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeightUnit {
    /// Kilograms.
    #[default]
    Kilogram,
    /// Pounds.
    Pound,
    /// Grams.
    Gram,
}

impl WeightUnit {
    /// Parse the unit token used by the scale firmware (`KG`, `LB`, `G`).
    ///
    /// Matching is case-insensitive. Unknown tokens return `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "KG" => Some(Self::Kilogram),
            "LB" => Some(Self::Pound),
            "G" => Some(Self::Gram),
            _ => None,
        }
    }

    /// Get the lowercase symbol for this unit.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Kilogram => "kg",
            Self::Pound => "lb",
            Self::Gram => "g",
        }
    }
}

impl std::fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single weight reading decoded from a notification.
///
/// Samples are handed to the caller as they arrive and are never cached.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightSample {
    /// Weight value in `unit`.
    pub value: f64,

    /// Unit of `value`.
    pub unit: WeightUnit,

    /// Whether the scale reported a settled reading.
    pub is_stable: bool,

    /// Whether the load exceeds the scale's capacity.
    pub is_overload: bool,

    /// When the notification was decoded.
    pub timestamp: DateTime<Utc>,
}

impl WeightSample {
    /// Create a sample stamped with the current time.
    pub fn new(value: f64, unit: WeightUnit, is_stable: bool, is_overload: bool) -> Self {
        Self {
            value,
            unit,
            is_stable,
            is_overload,
            timestamp: Utc::now(),
        }
    }

    /// Sentinel used for payloads that could not be understood.
    pub fn zero() -> Self {
        Self::new(0.0, WeightUnit::Kilogram, false, false)
    }

    /// Get the value converted to kilograms.
    pub fn to_kg(&self) -> f64 {
        match self.unit {
            WeightUnit::Kilogram => self.value,
            WeightUnit::Pound => lb_to_kg(self.value),
            WeightUnit::Gram => g_to_kg(self.value),
        }
    }
}

impl std::fmt::Display for WeightSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} {}", self.value, self.unit)?;
        if self.is_overload {
            write!(f, " (overload)")
        } else if !self.is_stable {
            write!(f, " (unstable)")
        } else {
            Ok(())
        }
    }
}
