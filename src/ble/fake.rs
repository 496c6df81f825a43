//! Scriptable in-memory transport used by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::ble::transport::{
    AdapterState, Advertisement, BleLink, BleTransport, NotificationEvent, NotificationStream,
    ScanFailure, ScanRequest, ScanStream,
};
use crate::ble::uuids::{CONTROL_CHARACTERISTIC_UUID, WEIGHT_CHARACTERISTIC_UUID};
use crate::error::{Error, Result};

type ScanItem = std::result::Result<Advertisement, ScanFailure>;

/// Maps a written control command to the firmware's reply.
pub(crate) type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Operation recorded on a fake link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkOp {
    Discover,
    RequestMtu(u16),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Write(Uuid, String),
    Disconnect,
}

#[derive(Default)]
struct Script {
    fail_scan_start: bool,
    fail_connect: bool,
    fail_mtu: bool,
    fail_weight_subscribe: bool,
    responder: Option<Responder>,
}

pub(crate) struct FakeTransport {
    adapter_state: watch::Sender<AdapterState>,
    scan_tx: Mutex<Option<mpsc::UnboundedSender<ScanItem>>>,
    scan_requests: Mutex<Vec<ScanRequest>>,
    scan_stops: Mutex<usize>,
    connect_calls: Mutex<usize>,
    links: Mutex<Vec<Arc<FakeLink>>>,
    log: Arc<Mutex<Vec<LinkOp>>>,
    script: Mutex<Script>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (adapter_state, _) = watch::channel(AdapterState::PoweredOn);
        Arc::new(Self {
            adapter_state,
            scan_tx: Mutex::new(None),
            scan_requests: Mutex::new(Vec::new()),
            scan_stops: Mutex::new(0),
            connect_calls: Mutex::new(0),
            links: Mutex::new(Vec::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            script: Mutex::new(Script::default()),
        })
    }

    pub(crate) fn set_adapter_state(&self, state: AdapterState) {
        self.adapter_state.send_replace(state);
    }

    pub(crate) fn fail_scan_start(&self, fail: bool) {
        self.script.lock().fail_scan_start = fail;
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.script.lock().fail_connect = fail;
    }

    pub(crate) fn fail_mtu(&self, fail: bool) {
        self.script.lock().fail_mtu = fail;
    }

    pub(crate) fn fail_weight_subscribe(&self, fail: bool) {
        self.script.lock().fail_weight_subscribe = fail;
    }

    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.script.lock().responder = Some(Arc::new(responder));
    }

    /// Report an advertisement on the running scan.
    pub(crate) fn advertise(&self, id: &str, name: Option<&str>) -> bool {
        self.push_scan(Ok(Advertisement {
            id: id.to_string(),
            local_name: name.map(str::to_string),
            rssi: Some(-60),
            connectable: Some(true),
            services: Vec::new(),
        }))
    }

    /// Report an error on the running scan.
    pub(crate) fn scan_error(&self, failure: ScanFailure) -> bool {
        self.push_scan(Err(failure))
    }

    fn push_scan(&self, item: ScanItem) -> bool {
        match self.scan_tx.lock().as_ref() {
            Some(tx) => tx.unbounded_send(item).is_ok(),
            None => false,
        }
    }

    pub(crate) fn scan_requests(&self) -> Vec<ScanRequest> {
        self.scan_requests.lock().clone()
    }

    pub(crate) fn scan_stops(&self) -> usize {
        *self.scan_stops.lock()
    }

    pub(crate) fn connect_calls(&self) -> usize {
        *self.connect_calls.lock()
    }

    pub(crate) fn last_link(&self) -> Option<Arc<FakeLink>> {
        self.links.lock().last().cloned()
    }

    pub(crate) fn ops(&self) -> Vec<LinkOp> {
        self.log.lock().clone()
    }

    pub(crate) fn clear_ops(&self) {
        self.log.lock().clear();
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(*self.adapter_state.borrow())
    }

    async fn start_scan(&self, request: ScanRequest) -> Result<ScanStream> {
        if self.script.lock().fail_scan_start {
            return Err(Error::BluetoothUnavailable);
        }
        self.scan_requests.lock().push(request);
        let (tx, rx) = mpsc::unbounded();
        *self.scan_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        *self.scan_stops.lock() += 1;
        self.scan_tx.lock().take();
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn BleLink>> {
        *self.connect_calls.lock() += 1;
        let script = self.script.lock();
        if script.fail_connect {
            return Err(Error::ConnectionFailed {
                reason: format!("{} unreachable", device_id),
            });
        }

        let (connected, _) = watch::channel(true);
        let link = Arc::new(FakeLink {
            id: device_id.to_string(),
            connected,
            notify_tx: Mutex::new(None),
            log: self.log.clone(),
            responder: script.responder.clone(),
            fail_mtu: script.fail_mtu,
            fail_weight_subscribe: script.fail_weight_subscribe,
        });
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

pub(crate) struct FakeLink {
    id: String,
    connected: watch::Sender<bool>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<NotificationEvent>>>,
    log: Arc<Mutex<Vec<LinkOp>>>,
    responder: Option<Responder>,
    fail_mtu: bool,
    fail_weight_subscribe: bool,
}

impl FakeLink {
    fn record(&self, op: LinkOp) {
        self.log.lock().push(op);
    }

    fn notify(&self, characteristic_uuid: Uuid, text: &str) -> bool {
        let event = NotificationEvent {
            characteristic_uuid,
            data: Bytes::copy_from_slice(text.as_bytes()),
        };
        match self.notify_tx.lock().as_ref() {
            Some(tx) => tx.unbounded_send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver a weight notification.
    pub(crate) fn push_weight(&self, text: &str) -> bool {
        self.notify(WEIGHT_CHARACTERISTIC_UUID, text)
    }

    /// Deliver an unsolicited control notification.
    pub(crate) fn push_control(&self, text: &str) -> bool {
        self.notify(CONTROL_CHARACTERISTIC_UUID, text)
    }

    /// Simulate the peripheral going out of range.
    pub(crate) fn drop_link(&self) {
        self.notify_tx.lock().take();
        self.connected.send_replace(false);
    }
}

#[async_trait]
impl BleLink for FakeLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<String> {
        None
    }

    async fn discover(&self) -> Result<()> {
        self.record(LinkOp::Discover);
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        self.record(LinkOp::RequestMtu(mtu));
        if self.fail_mtu {
            return Err(Error::NotSupported {
                operation: "MTU negotiation".to_string(),
            });
        }
        Ok(mtu)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        self.record(LinkOp::Subscribe(characteristic));
        if self.fail_weight_subscribe && characteristic == WEIGHT_CHARACTERISTIC_UUID {
            return Err(Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        self.record(LinkOp::Unsubscribe(characteristic));
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], _with_response: bool) -> Result<()> {
        if !*self.connected.borrow() {
            return Err(Error::NotConnected);
        }
        let text = String::from_utf8_lossy(data).into_owned();
        self.record(LinkOp::Write(characteristic, text.clone()));

        if characteristic == CONTROL_CHARACTERISTIC_UUID {
            if let Some(reply) = self.responder.as_ref().and_then(|r| r(&text)) {
                self.push_control(&reply);
            }
        }
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded();
        *self.notify_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn wait_disconnected(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| !*connected).await;
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(LinkOp::Disconnect);
        self.notify_tx.lock().take();
        self.connected.send_replace(false);
        Ok(())
    }
}
