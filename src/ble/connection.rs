//! Connection state tracking.
//!
//! Holds the single connection state of a scale service and fans every
//! transition out to the registered callback and broadcast subscribers.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::data::ScaleDevice;

/// Connection state for a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No session and no scan.
    #[default]
    Disconnected,
    /// Currently scanning for scales.
    Scanning,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to a scale.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
    /// The last scan or connect failed.
    Error,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Check if no session is open or opening.
    ///
    /// `Error` counts as idle for every entry check.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Snapshot emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleConnectionState {
    /// The new state.
    pub state: ConnectionState,
    /// The scale involved, if any.
    pub device: Option<ScaleDevice>,
    /// Failure description for `Error` (and lost links).
    pub error: Option<String>,
}

impl ScaleConnectionState {
    /// Create a snapshot.
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            device: None,
            error: None,
        }
    }

    /// Attach a device.
    pub fn with_device(mut self, device: Option<ScaleDevice>) -> Self {
        self.device = device;
        self
    }

    /// Attach an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Callback invoked on every state transition.
pub type StateCallback = Arc<dyn Fn(&ScaleConnectionState) + Send + Sync>;

/// Owner of the connection state.
pub(crate) struct StateTracker {
    /// Current snapshot.
    current: RwLock<ScaleConnectionState>,
    /// Serialises transitions so observers see them in order.
    emit_lock: Mutex<()>,
    /// Registered caller callback.
    callback: RwLock<Option<StateCallback>>,
    /// Channel for state events.
    event_tx: broadcast::Sender<ScaleConnectionState>,
}

impl StateTracker {
    pub(crate) fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self {
            current: RwLock::new(ScaleConnectionState::default()),
            emit_lock: Mutex::new(()),
            callback: RwLock::new(None),
            event_tx,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.current.read().state
    }

    pub(crate) fn snapshot(&self) -> ScaleConnectionState {
        self.current.read().clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ScaleConnectionState> {
        self.event_tx.subscribe()
    }

    pub(crate) fn set_callback(&self, callback: Option<StateCallback>) {
        *self.callback.write() = callback;
    }

    /// Move to a new snapshot and emit it. Identical snapshots are not re-emitted.
    pub(crate) fn set(&self, next: ScaleConnectionState) -> bool {
        let _emit = self.emit_lock.lock();
        self.apply(next)
    }

    /// Move to `next` only if the current state is `expected`.
    pub(crate) fn transition_if(
        &self,
        expected: ConnectionState,
        next: ScaleConnectionState,
    ) -> bool {
        let _emit = self.emit_lock.lock();
        if self.current.read().state != expected {
            return false;
        }
        self.apply(next)
    }

    fn apply(&self, next: ScaleConnectionState) -> bool {
        let previous = {
            let mut current = self.current.write();
            if *current == next {
                return false;
            }
            std::mem::replace(&mut *current, next.clone())
        };

        debug!(
            "Connection state changed: {} -> {}",
            previous.state, next.state
        );

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&next);
        }
        let _ = self.event_tx.send(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());

        assert!(ConnectionState::Error.is_idle());
        assert!(ConnectionState::Disconnected.is_idle());
        assert!(!ConnectionState::Scanning.is_idle());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Scanning), "Scanning");
        assert_eq!(format!("{}", ConnectionState::Error), "Error");
    }

    #[test]
    fn test_tracker_emits_to_callback_and_channel() {
        let tracker = StateTracker::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        tracker.set_callback(Some(Arc::new(move |s: &ScaleConnectionState| {
            sink.lock().push(s.state)
        })));
        let mut rx = tracker.subscribe();

        assert!(tracker.set(ScaleConnectionState::new(ConnectionState::Scanning)));
        assert!(!tracker.set(ScaleConnectionState::new(ConnectionState::Scanning)));
        assert!(tracker.set(
            ScaleConnectionState::new(ConnectionState::Error).with_error("adapter off")
        ));

        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Scanning, ConnectionState::Error]
        );
        assert_eq!(rx.try_recv().unwrap().state, ConnectionState::Scanning);
        let error = rx.try_recv().unwrap();
        assert_eq!(error.error.as_deref(), Some("adapter off"));
    }

    #[test]
    fn test_transition_if() {
        let tracker = StateTracker::new(8);
        assert!(!tracker.transition_if(
            ConnectionState::Scanning,
            ScaleConnectionState::new(ConnectionState::Disconnected)
        ));

        tracker.set(ScaleConnectionState::new(ConnectionState::Scanning));
        assert!(tracker.transition_if(
            ConnectionState::Scanning,
            ScaleConnectionState::new(ConnectionState::Disconnected)
        ));
        assert_eq!(tracker.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_callback_can_read_state() {
        let tracker = Arc::new(StateTracker::new(8));
        let observed = Arc::new(Mutex::new(None));
        let (inner, sink) = (tracker.clone(), observed.clone());
        tracker.set_callback(Some(Arc::new(move |_: &ScaleConnectionState| {
            *sink.lock() = Some(inner.state());
        })));

        tracker.set(ScaleConnectionState::new(ConnectionState::Connecting));
        assert_eq!(*observed.lock(), Some(ConnectionState::Connecting));
        tracker.set_callback(None);
    }
}
