//! Subscription handles owned by a scale session.
//!
//! Every handle shares the session's link-valid flag. Once the link has been
//! cancelled the flag is cleared and releasing a handle only stops local work;
//! it never calls back into the platform for a link that is already gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{BleLink, NotificationEvent};
use crate::ble::uuids::CONTROL_CHARACTERISTIC_UUID;
use crate::protocol::decode_text;

/// What a subscription handle is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Forwards the link's notification stream to the session channel.
    Notifications,
    /// Weight characteristic notifications.
    Weight,
    /// Control characteristic notifications.
    Control,
    /// Watches for the link going away.
    Lifecycle,
}

/// Shared validity flag of a session's link.
#[derive(Debug, Clone)]
pub(crate) struct LinkValidity(Arc<AtomicBool>);

impl LinkValidity {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A native subscription and/or a local task tied to a session.
pub(crate) struct Subscription {
    kind: SubscriptionKind,
    characteristic: Option<Uuid>,
    validity: LinkValidity,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(
        kind: SubscriptionKind,
        characteristic: Option<Uuid>,
        validity: LinkValidity,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            kind,
            characteristic,
            validity,
            task,
        }
    }

    pub(crate) fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Release the handle while the link may still be up.
    ///
    /// The native unsubscribe is skipped once the link has been invalidated.
    pub(crate) async fn release(mut self, link: &dyn BleLink) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let Some(characteristic) = self.characteristic else {
            return;
        };
        if !self.validity.is_valid() {
            trace!("Skipping unsubscribe of {:?}: link already cancelled", self.kind);
            return;
        }
        if let Err(e) = link.unsubscribe(characteristic).await {
            warn!("Failed to unsubscribe {:?}: {}", self.kind, e);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// All handles of one session.
#[derive(Default)]
pub(crate) struct SubscriptionSet {
    handles: Vec<Subscription>,
}

impl SubscriptionSet {
    pub(crate) fn push(&mut self, subscription: Subscription) {
        self.handles.push(subscription);
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Release every handle against a live link, newest first.
    pub(crate) async fn release_all(&mut self, link: &dyn BleLink) {
        while let Some(subscription) = self.handles.pop() {
            subscription.release(link).await;
        }
    }

    /// Drop every handle without touching the link.
    pub(crate) fn clear(&mut self) {
        let count = self.handles.len();
        self.handles.clear();
        if count > 0 {
            debug!("Dropped {} subscription handles", count);
        }
    }
}

/// Temporary listener for one control response.
pub(crate) struct ResponseListener {
    rx: broadcast::Receiver<NotificationEvent>,
    validity: LinkValidity,
}

impl ResponseListener {
    pub(crate) fn new(rx: broadcast::Receiver<NotificationEvent>, validity: LinkValidity) -> Self {
        Self { rx, validity }
    }

    /// Wait for the next control notification as text.
    ///
    /// Returns `None` once the session channel is closed.
    pub(crate) async fn next_response(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.characteristic_uuid == CONTROL_CHARACTERISTIC_UUID => {
                    return Some(decode_text(&event.data));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Response listener lagged by {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Remove the listener.
    ///
    /// The listener is a local broadcast receiver, so removing it never calls
    /// into the platform and is safe after the link is gone.
    pub(crate) fn release(self) {
        if !self.validity.is_valid() {
            trace!("Response listener outlived its link");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::{FakeTransport, LinkOp};
    use crate::ble::transport::BleTransport;
    use crate::ble::uuids::WEIGHT_CHARACTERISTIC_UUID;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_release_unsubscribes_valid_handle() {
        let transport = FakeTransport::new();
        let link = transport.connect("scale-1").await.unwrap();
        let validity = LinkValidity::new();

        let sub = Subscription::new(
            SubscriptionKind::Weight,
            Some(WEIGHT_CHARACTERISTIC_UUID),
            validity,
            None,
        );
        sub.release(link.as_ref()).await;

        assert_eq!(
            transport.ops(),
            vec![LinkOp::Unsubscribe(WEIGHT_CHARACTERISTIC_UUID)]
        );
    }

    #[tokio::test]
    async fn test_release_skips_invalidated_handle() {
        let transport = FakeTransport::new();
        let link = transport.connect("scale-1").await.unwrap();
        let validity = LinkValidity::new();

        let mut set = SubscriptionSet::default();
        set.push(Subscription::new(
            SubscriptionKind::Control,
            Some(CONTROL_CHARACTERISTIC_UUID),
            validity.clone(),
            None,
        ));
        validity.invalidate();
        set.release_all(link.as_ref()).await;

        assert!(transport.ops().is_empty());
        assert_eq!(set.len(), 0);
    }

    #[tokio::test]
    async fn test_drop_aborts_task() {
        let task = tokio::spawn(futures::future::pending::<()>());
        let abort = task.abort_handle();
        let sub = Subscription::new(
            SubscriptionKind::Lifecycle,
            None,
            LinkValidity::new(),
            Some(task),
        );
        assert_eq!(sub.kind(), SubscriptionKind::Lifecycle);

        drop(sub);
        let finished = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !abort.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_response_listener_filters_control() {
        let (tx, rx) = broadcast::channel(8);
        let validity = LinkValidity::new();
        let mut listener = ResponseListener::new(rx, validity.clone());

        tx.send(NotificationEvent {
            characteristic_uuid: WEIGHT_CHARACTERISTIC_UUID,
            data: Bytes::from_static(b"1.000"),
        })
        .unwrap();
        tx.send(NotificationEvent {
            characteristic_uuid: CONTROL_CHARACTERISTIC_UUID,
            data: Bytes::from_static(b"OK"),
        })
        .unwrap();

        assert_eq!(listener.next_response().await.as_deref(), Some("OK"));
        drop(tx);
        assert_eq!(listener.next_response().await, None);

        validity.invalidate();
        listener.release();
    }
}
