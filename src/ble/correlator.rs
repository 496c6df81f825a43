//! Command/response correlation on the control characteristic.
//!
//! The firmware only answers some commands, so a command resolves with the
//! first control notification after the write, or with an assumed success
//! once the timeout elapses.

use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::ble::session::SessionLink;
use crate::ble::subscription::ResponseListener;
use crate::ble::uuids::CONTROL_CHARACTERISTIC_UUID;
use crate::error::{Error, Result};
use crate::protocol::{parse_control_response, CommandOutcome, ScaleCommand};

/// Send `command` and wait for its response.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for commands that cannot be encoded and
/// [`Error::ConnectionLost`] if the session ends while waiting. A failed write
/// resolves to an unsuccessful [`CommandOutcome`].
pub(crate) async fn exchange(
    session: SessionLink,
    command: &ScaleCommand,
    timeout: Duration,
) -> Result<CommandOutcome> {
    let payload = command.encode()?;
    let label = command.label();

    let SessionLink {
        link,
        notifications,
        validity,
    } = session;

    // Listen before writing so a fast reply is not missed.
    let mut listener = ResponseListener::new(notifications.subscribe(), validity);
    drop(notifications);

    debug!("Sending {} command", label);
    if let Err(e) = link
        .write(CONTROL_CHARACTERISTIC_UUID, &payload, true)
        .await
    {
        warn!("Failed to write {} command: {}", label, e);
        listener.release();
        return Ok(CommandOutcome::failure(label, e.to_string()));
    }

    let result = tokio::select! {
        response = listener.next_response() => match response {
            Some(text) => {
                trace!("Response to {}: {}", label, text.trim());
                Ok(parse_control_response(&text))
            }
            None => Err(Error::ConnectionLost),
        },
        _ = tokio::time::sleep(timeout) => {
            debug!("No response to {} within {:?}, assuming success", label, timeout);
            Ok(CommandOutcome::assumed(label))
        }
    };

    listener.release();
    result
}
