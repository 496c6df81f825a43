//! The active connection to one scale.
//!
//! A session owns the link, the notification channel fed by the link and
//! every subscription handle. It is replaced on each connect and destroyed on
//! disconnect or link loss.

use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument, Span};

use crate::ble::subscription::{LinkValidity, Subscription, SubscriptionSet};
use crate::ble::transport::{BleLink, NotificationEvent, NotificationStream};
use crate::ble::uuids::WEIGHT_CHARACTERISTIC_UUID;
use crate::data::{ScaleDevice, WeightSample};
use crate::protocol::decode_weight;

/// Callback invoked for every decoded weight sample.
pub type WeightCallback = Arc<dyn Fn(&WeightSample) + Send + Sync>;

/// Fan-out point for decoded weight samples.
pub(crate) struct WeightHub {
    tx: broadcast::Sender<WeightSample>,
    callback: RwLock<Option<WeightCallback>>,
}

impl WeightHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            callback: RwLock::new(None),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<WeightSample> {
        self.tx.subscribe()
    }

    pub(crate) fn set_callback(&self, callback: Option<WeightCallback>) {
        *self.callback.write() = callback;
    }

    fn publish(&self, sample: WeightSample) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&sample);
        }
        let _ = self.tx.send(sample);
    }
}

/// What the command path needs from a session.
#[derive(Clone)]
pub(crate) struct SessionLink {
    pub(crate) link: Arc<dyn BleLink>,
    pub(crate) notifications: broadcast::Sender<NotificationEvent>,
    pub(crate) validity: LinkValidity,
}

pub(crate) struct ActiveSession {
    generation: u64,
    device: ScaleDevice,
    link: Arc<dyn BleLink>,
    notifications: broadcast::Sender<NotificationEvent>,
    validity: LinkValidity,
    closing: Arc<AtomicBool>,
    subscriptions: SubscriptionSet,
}

impl ActiveSession {
    pub(crate) fn new(
        generation: u64,
        device: ScaleDevice,
        link: Arc<dyn BleLink>,
        capacity: usize,
    ) -> Self {
        let (notifications, _) = broadcast::channel(capacity);
        Self {
            generation,
            device,
            link,
            notifications,
            validity: LinkValidity::new(),
            closing: Arc::new(AtomicBool::new(false)),
            subscriptions: SubscriptionSet::default(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn device(&self) -> &ScaleDevice {
        &self.device
    }

    pub(crate) fn link(&self) -> &Arc<dyn BleLink> {
        &self.link
    }

    pub(crate) fn validity(&self) -> LinkValidity {
        self.validity.clone()
    }

    pub(crate) fn closing_flag(&self) -> Arc<AtomicBool> {
        self.closing.clone()
    }

    pub(crate) fn handle(&self) -> SessionLink {
        SessionLink {
            link: self.link.clone(),
            notifications: self.notifications.clone(),
            validity: self.validity.clone(),
        }
    }

    pub(crate) fn add(&mut self, subscription: Subscription) {
        let kind = subscription.kind();
        self.subscriptions.push(subscription);
        trace!(
            "Session holds {:?} subscription ({} total)",
            kind,
            self.subscriptions.len()
        );
    }

    /// Forward the link's notifications onto the session channel.
    pub(crate) fn spawn_pump(&self, mut stream: NotificationStream, span: Span) -> JoinHandle<()> {
        let tx = self.notifications.clone();
        tokio::spawn(
            async move {
                while let Some(event) = stream.next().await {
                    trace!(
                        "Notification from {}: {} bytes",
                        event.characteristic_uuid,
                        event.data.len()
                    );
                    let _ = tx.send(event);
                }
                debug!("Notification stream ended");
            }
            .instrument(span),
        )
    }

    /// Decode weight notifications and hand them to the hub.
    pub(crate) fn spawn_weight_forwarder(&self, hub: Arc<WeightHub>, span: Span) -> JoinHandle<()> {
        let mut rx = self.notifications.subscribe();
        tokio::spawn(
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if event.characteristic_uuid == WEIGHT_CHARACTERISTIC_UUID => {
                            hub.publish(decode_weight(&event.data));
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Weight forwarder lagged by {} notifications", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Tear down a session whose connect sequence failed.
    ///
    /// The link is still up, so handles are released natively before it is cancelled.
    pub(crate) async fn abort(mut self) {
        self.closing.store(true, Ordering::Release);
        self.subscriptions.release_all(self.link.as_ref()).await;
        if let Err(e) = self.link.disconnect().await {
            debug!("Disconnect after failed connect: {}", e);
        }
        self.validity.invalidate();
    }

    /// Explicit teardown: cancel the link, then invalidate and drop the handles.
    pub(crate) async fn close(mut self) {
        self.closing.store(true, Ordering::Release);
        info!("Disconnecting from {}", self.device.display_name());
        if let Err(e) = self.link.disconnect().await {
            warn!("Failed to disconnect: {}", e);
        }
        self.validity.invalidate();
        self.subscriptions.clear();
    }

    /// Teardown after the link already went away.
    pub(crate) fn discard(mut self) {
        self.validity.invalidate();
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::{FakeTransport, LinkOp};
    use crate::ble::subscription::SubscriptionKind;
    use crate::ble::transport::BleTransport;
    use crate::ble::uuids::CONTROL_CHARACTERISTIC_UUID;
    use std::time::Duration;

    async fn open(transport: &FakeTransport) -> ActiveSession {
        let link = transport.connect("scale-1").await.unwrap();
        ActiveSession::new(1, ScaleDevice::new("scale-1", "KGiTON"), link, 16)
    }

    #[tokio::test]
    async fn test_weight_forwarding() {
        let transport = FakeTransport::new();
        let mut session = open(&transport).await;
        let hub = Arc::new(WeightHub::new(8));
        let mut weights = hub.subscribe();

        let stream = session.link().notifications().await.unwrap();
        let forwarder = session.spawn_weight_forwarder(hub.clone(), Span::none());
        let pump = session.spawn_pump(stream, Span::none());
        let validity = session.validity();
        session.add(Subscription::new(
            SubscriptionKind::Notifications,
            None,
            validity.clone(),
            Some(pump),
        ));
        session.add(Subscription::new(
            SubscriptionKind::Weight,
            Some(WEIGHT_CHARACTERISTIC_UUID),
            validity,
            Some(forwarder),
        ));

        let link = transport.last_link().unwrap();
        link.push_control("OK");
        link.push_weight("1.250");

        let sample = tokio::time::timeout(Duration::from_secs(1), weights.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.value, 1.25);
        assert!(sample.is_stable);
    }

    #[tokio::test]
    async fn test_close_never_unsubscribes() {
        let transport = FakeTransport::new();
        let mut session = open(&transport).await;
        let validity = session.validity();
        session.add(Subscription::new(
            SubscriptionKind::Control,
            Some(CONTROL_CHARACTERISTIC_UUID),
            validity.clone(),
            None,
        ));

        session.close().await;

        assert_eq!(transport.ops(), vec![LinkOp::Disconnect]);
        assert!(!validity.is_valid());
    }

    #[tokio::test]
    async fn test_abort_releases_before_disconnect() {
        let transport = FakeTransport::new();
        let mut session = open(&transport).await;
        let validity = session.validity();
        session.add(Subscription::new(
            SubscriptionKind::Control,
            Some(CONTROL_CHARACTERISTIC_UUID),
            validity,
            None,
        ));

        session.abort().await;

        assert_eq!(
            transport.ops(),
            vec![
                LinkOp::Unsubscribe(CONTROL_CHARACTERISTIC_UUID),
                LinkOp::Disconnect
            ]
        );
    }
}
