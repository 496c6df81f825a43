//! Control response decoding.
//!
//! The firmware answers commands on the control characteristic with a
//! single text token. Unknown tokens are treated as success.

/// Result of a control command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandOutcome {
    /// Whether the scale accepted the command.
    pub success: bool,

    /// The command family the response belongs to (`CONNECT`, `OK`, `ERROR`, ...).
    pub command: String,

    /// Human readable message.
    pub message: Option<String>,
}

impl CommandOutcome {
    /// Create a successful outcome.
    pub fn success(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            command: command.into(),
            message: Some(message.into()),
        }
    }

    /// Create a failed outcome.
    pub fn failure(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            command: command.into(),
            message: Some(message.into()),
        }
    }

    /// Outcome used when the scale stays silent within the command timeout.
    ///
    /// The firmware does not acknowledge every command, so silence counts as success.
    pub fn assumed(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            success: true,
            message: Some(format!("{} sent", command)),
            command,
        }
    }

    /// Get the message, or an empty string.
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// Decode a control notification into a [`CommandOutcome`].
///
/// # Example
///
/// ```
/// use kgiton_rust_ble::protocol::parse_control_response;
///
/// let outcome = parse_control_response("ERROR:INVALID_LICENSE");
/// assert!(!outcome.success);
/// assert_eq!(outcome.message.as_deref(), Some("License key tidak valid"));
/// ```
pub fn parse_control_response(response: &str) -> CommandOutcome {
    let token = response.trim();

    if let Some(code) = token.strip_prefix("ERROR:") {
        return CommandOutcome::failure("ERROR", error_message(code));
    }

    match token {
        "CONNECTED" => CommandOutcome::success("CONNECT", "Berhasil terhubung"),
        "DISCONNECTED" => CommandOutcome::success("DISCONNECT", "Berhasil terputus"),
        "ALREADY_CONNECTED" => CommandOutcome::success("CONNECT", "Sudah terhubung"),
        "ALREADY_DISCONNECTED" => CommandOutcome::success("DISCONNECT", "Sudah terputus"),
        "OK" => CommandOutcome::success("OK", "OK"),
        other => CommandOutcome::success(other, other),
    }
}

fn error_message(code: &str) -> String {
    match code {
        "INVALID_LICENSE" | "INVALID_KEY" => "License key tidak valid".to_string(),
        "INVALID_FORMAT" => "Format perintah salah".to_string(),
        "UNKNOWN_COMMAND" => "Perintah tidak dikenal".to_string(),
        other => format!("Error: {}", other),
    }
}
