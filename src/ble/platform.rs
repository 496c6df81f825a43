//! btleplug-backed transport.
//!
//! Maps the host adapter onto [`BleTransport`] and each connected peripheral
//! onto [`BleLink`].

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{
    AdapterState, Advertisement, BleLink, BleTransport, NotificationEvent, NotificationStream,
    ScanErrorKind, ScanFailure, ScanRequest, ScanStream,
};
use crate::ble::uuids::{is_scale_service, SCALE_SERVICE_UUID, WEIGHT_CHARACTERISTIC_UUID};
use crate::error::{Error, Result};

/// How often a link is polled for liveness while waiting for it to drop.
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(1);

type PeripheralCache = Arc<RwLock<HashMap<String, Peripheral>>>;

/// Transport over the first system Bluetooth adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    /// Peripherals seen while scanning, by id.
    peripherals: PeripheralCache,
}

impl BtleplugTransport {
    /// Open the first system adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn find_peripheral(&self, device_id: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.read().get(device_id).cloned() {
            return Ok(peripheral);
        }

        self.adapter
            .peripherals()
            .await
            .map_err(Error::Bluetooth)?
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: device_id.to_string(),
            })
    }
}

fn adapter_state_from(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

fn advertisement_from(id: String, properties: PeripheralProperties) -> Advertisement {
    Advertisement {
        id,
        local_name: properties.local_name,
        rssi: properties.rssi,
        connectable: None,
        services: properties.services,
    }
}

async fn lookup_advertisement(
    adapter: &Adapter,
    cache: &PeripheralCache,
    id: btleplug::platform::PeripheralId,
) -> Option<Advertisement> {
    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return None;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return None,
    };

    let identifier = id.to_string();
    cache.write().insert(identifier.clone(), peripheral);
    Some(advertisement_from(identifier, properties))
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn adapter_state(&self) -> Result<AdapterState> {
        let state = self
            .adapter
            .adapter_state()
            .await
            .map_err(Error::Bluetooth)?;
        Ok(adapter_state_from(state))
    }

    async fn start_scan(&self, request: ScanRequest) -> Result<ScanStream> {
        // Subscribe before starting so early advertisements are not missed.
        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter {
                services: request.services,
            })
            .await
            .map_err(Error::Bluetooth)?;

        let adapter = self.adapter.clone();
        let cache = self.peripherals.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let cache = cache.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        lookup_advertisement(&adapter, &cache, id).await.map(Ok)
                    }
                    CentralEvent::StateUpdate(CentralState::PoweredOff) => Some(Err(
                        ScanFailure::new(ScanErrorKind::PoweredOff, "Bluetooth adapter powered off"),
                    )),
                    CentralEvent::StateUpdate(state) => {
                        debug!("Adapter state update: {:?}", state);
                        None
                    }
                    _ => None,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn BleLink>> {
        let peripheral = self.find_peripheral(device_id).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await.map_err(|e| Error::ConnectionFailed {
                reason: e.to_string(),
            })?;
        }

        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name);

        debug!("Link established to {}", device_id);
        Ok(Arc::new(BtleplugLink {
            id: device_id.to_string(),
            name,
            peripheral,
            adapter: self.adapter.clone(),
            characteristics: RwLock::new(HashMap::new()),
        }))
    }
}

/// A connected btleplug peripheral.
struct BtleplugLink {
    id: String,
    name: Option<String>,
    peripheral: Peripheral,
    adapter: Adapter,
    /// Cached characteristics by UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn discover(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let services = self.peripheral.services();
        if !services.iter().any(|s| is_scale_service(&s.uuid)) {
            return Err(Error::ServiceNotFound {
                uuid: SCALE_SERVICE_UUID.to_string(),
            });
        }

        let mut chars = self.characteristics.write();
        chars.clear();
        for service in services {
            for characteristic in service.characteristics {
                trace!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid,
                    service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }
        debug!("Discovered {} characteristics", chars.len());

        if !chars.contains_key(&WEIGHT_CHARACTERISTIC_UUID) {
            return Err(Error::CharacteristicNotFound {
                uuid: WEIGHT_CHARACTERISTIC_UUID.to_string(),
            });
        }
        Ok(())
    }

    async fn request_mtu(&self, _mtu: u16) -> Result<u16> {
        // The host stack negotiates the MTU on its own.
        Err(Error::NotSupported {
            operation: "MTU negotiation".to_string(),
        })
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .subscribe(&target)
            .await
            .map_err(Error::Bluetooth)?;
        debug!("Subscribed to notifications from {}", characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .unsubscribe(&target)
            .await
            .map_err(Error::Bluetooth)?;
        debug!("Unsubscribed from notifications from {}", characteristic);
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], with_response: bool) -> Result<()> {
        let target = self.characteristic(characteristic)?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&target, data, write_type)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), characteristic);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        Ok(stream
            .map(|notification| NotificationEvent {
                characteristic_uuid: notification.uuid,
                data: Bytes::from(notification.value),
            })
            .boxed())
    }

    async fn wait_disconnected(&self) {
        let peripheral_id = self.peripheral.id();
        let mut events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Adapter events unavailable, polling link state: {}", e);
                futures::stream::empty().boxed()
            }
        };
        let mut events_open = true;
        let mut poll = tokio::time::interval(LINK_POLL_INTERVAL);

        loop {
            tokio::select! {
                event = events.next(), if events_open => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                        debug!("Device disconnected: {}", self.id);
                        return;
                    }
                    Some(_) => {}
                    None => events_open = false,
                },
                _ = poll.tick() => {
                    if !self.peripheral.is_connected().await.unwrap_or(false) {
                        debug!("Link to {} no longer connected", self.id);
                        return;
                    }
                }
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(Error::Bluetooth)
    }
}
