//! Scale device descriptors.

/// A scale seen during discovery.
///
/// This is an immutable snapshot taken from an advertisement. Call
/// [`crate::ScaleService::connect`] with its `id` to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleDevice {
    /// Platform identifier of the peripheral.
    pub id: String,

    /// Advertised local name, empty when the scale did not advertise one.
    pub name: String,

    /// Signal strength of the advertisement.
    pub rssi: Option<i16>,

    /// Whether the advertisement reported the device as connectable.
    pub connectable: Option<bool>,
}

impl ScaleDevice {
    /// Create a descriptor with only an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rssi: None,
            connectable: None,
        }
    }

    /// Get a human readable label, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl std::fmt::Display for ScaleDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.rssi {
            Some(rssi) => write!(f, "{} ({}, {} dBm)", self.display_name(), self.id, rssi),
            None => write!(f, "{} ({})", self.display_name(), self.id),
        }
    }
}
