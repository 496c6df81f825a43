//! BLE scanning functionality.
//!
//! Provides the scanner for discovering KGiTON scales.

use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn, Instrument, Span};
use uuid::Uuid;

use crate::ble::connection::{ConnectionState, ScaleConnectionState, StateTracker};
use crate::ble::transport::{Advertisement, BleTransport, ScanRequest, ScanStream};
use crate::ble::uuids::matches_device_name;
use crate::config::DEFAULT_SCAN_TIMEOUT;
use crate::data::ScaleDevice;

/// Callback invoked for every matching scale found during a scan.
pub type DeviceCallback = Arc<dyn Fn(ScaleDevice) + Send + Sync>;

/// Options for a single scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Only report peripherals advertising this service.
    pub service_filter: Option<Uuid>,
    /// Report every advertisement instead of once per device.
    pub allow_duplicates: bool,
    /// How long the scan runs before stopping on its own. `None` uses
    /// [`crate::ScaleConfig::scan_timeout`].
    pub timeout: Option<Duration>,
    /// Report every peripheral, not only KGiTON scales.
    pub scan_all_devices: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            service_filter: None,
            allow_duplicates: false,
            timeout: None,
            scan_all_devices: false,
        }
    }
}

impl ScanOptions {
    /// Set the service filter.
    pub fn with_service_filter(mut self, service: Uuid) -> Self {
        self.service_filter = Some(service);
        self
    }

    /// Set whether duplicate advertisements are reported.
    pub fn with_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Set the scan timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set whether non-KGiTON peripherals are reported.
    pub fn with_all_devices(mut self, all: bool) -> Self {
        self.scan_all_devices = all;
        self
    }

    /// Fill in the timeout if the caller left it unset.
    pub(crate) fn or_timeout(mut self, timeout: Duration) -> Self {
        self.timeout.get_or_insert(timeout);
        self
    }

    fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_SCAN_TIMEOUT)
    }
}

/// Why a running scan was stopped from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanStop {
    /// The caller asked to stop.
    Requested,
    /// A connect is taking over the radio.
    Connecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanEnd {
    Stopped(ScanStop),
    TimedOut,
    StreamEnded,
    Failed(String),
}

struct ActiveScan {
    stop_tx: oneshot::Sender<ScanStop>,
    task: JoinHandle<()>,
}

/// BLE scanner for discovering KGiTON scales.
pub(crate) struct Scanner {
    transport: Arc<dyn BleTransport>,
    status: Arc<StateTracker>,
    /// Name fragment matched against advertised names.
    name_fragment: String,
    /// Consecutive transient errors tolerated before the scan fails.
    max_consecutive_errors: u32,
    /// Whether scanning is currently active.
    scanning: Arc<AtomicBool>,
    /// Handle to the running scan.
    active: Arc<Mutex<Option<ActiveScan>>>,
    /// Discovered scales.
    discovered: Arc<RwLock<HashMap<String, ScaleDevice>>>,
}

impl Scanner {
    pub(crate) fn new(
        transport: Arc<dyn BleTransport>,
        status: Arc<StateTracker>,
        name_fragment: impl Into<String>,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            transport,
            status,
            name_fragment: name_fragment.into(),
            max_consecutive_errors,
            scanning: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(None)),
            discovered: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    pub(crate) fn discovered(&self) -> Vec<ScaleDevice> {
        self.discovered.read().values().cloned().collect()
    }

    pub(crate) fn lookup(&self, id: &str) -> Option<ScaleDevice> {
        self.discovered.read().get(id).cloned()
    }

    /// Start scanning.
    ///
    /// Failures are reported as an `Error` state, never returned.
    pub(crate) async fn start(&self, options: ScanOptions, on_device: DeviceCallback, span: Span) {
        if self.scanning.swap(true, Ordering::AcqRel) {
            debug!("Already scanning, ignoring start request");
            return;
        }

        info!(
            "Starting BLE scan for KGiTON scales (timeout {:?})",
            options.effective_timeout()
        );

        if self.status.state().is_idle() {
            self.status
                .set(ScaleConnectionState::new(ConnectionState::Scanning));
        }

        let request = ScanRequest {
            services: options.service_filter.into_iter().collect(),
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = ScanWorker {
            transport: self.transport.clone(),
            status: self.status.clone(),
            name_fragment: self.name_fragment.clone(),
            max_consecutive_errors: self.max_consecutive_errors,
            scanning: self.scanning.clone(),
            active: self.active.clone(),
            discovered: self.discovered.clone(),
            options,
            on_device,
        };

        // The slot is filled before the platform call so a stop issued while
        // the scan is starting reaches the worker.
        {
            let mut active = self.active.lock();
            let task = tokio::spawn(worker.run(request, stop_rx, ready_tx).instrument(span));
            *active = Some(ActiveScan { stop_tx, task });
        }

        // Resolves once the platform scan is running or the attempt is finalized.
        let _ = ready_rx.await;
    }

    /// Stop the running scan and wait until it has been finalized.
    pub(crate) async fn stop(&self, reason: ScanStop) {
        let active = self.active.lock().take();
        let Some(active) = active else {
            trace!("Not scanning, ignoring stop request");
            return;
        };

        info!("Stopping BLE scan ({:?})", reason);
        let _ = active.stop_tx.send(reason);
        let _ = active.task.await;
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let Some(active) = self.active.lock().take() {
            active.task.abort();
        }
        self.scanning.store(false, Ordering::Release);
    }
}

struct ScanWorker {
    transport: Arc<dyn BleTransport>,
    status: Arc<StateTracker>,
    name_fragment: String,
    max_consecutive_errors: u32,
    scanning: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveScan>>>,
    discovered: Arc<RwLock<HashMap<String, ScaleDevice>>>,
    options: ScanOptions,
    on_device: DeviceCallback,
}

impl ScanWorker {
    async fn run(
        self,
        request: ScanRequest,
        mut stop_rx: oneshot::Receiver<ScanStop>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let end = match self.transport.start_scan(request).await {
            Ok(stream) => {
                let _ = ready_tx.send(());
                let end = match stop_rx.try_recv() {
                    Ok(reason) => {
                        debug!("Scan stopped while starting ({:?})", reason);
                        ScanEnd::Stopped(reason)
                    }
                    Err(_) => self.scan(stream, stop_rx).await,
                };
                if let Err(e) = self.transport.stop_scan().await {
                    warn!("Failed to stop platform scan: {}", e);
                }
                end
            }
            Err(e) => {
                warn!("Failed to start scan: {}", e);
                match stop_rx.try_recv() {
                    Ok(reason) => ScanEnd::Stopped(reason),
                    Err(_) => ScanEnd::Failed(format!("Scan failed: {}", e)),
                }
            }
        };
        debug!("Scan ended: {:?}", end);

        match end {
            ScanEnd::Stopped(ScanStop::Connecting) => {}
            ScanEnd::Stopped(ScanStop::Requested) | ScanEnd::TimedOut | ScanEnd::StreamEnded => {
                self.status.transition_if(
                    ConnectionState::Scanning,
                    ScaleConnectionState::new(ConnectionState::Disconnected),
                );
            }
            ScanEnd::Failed(message) => {
                self.status.transition_if(
                    ConnectionState::Scanning,
                    ScaleConnectionState::new(ConnectionState::Error).with_error(message),
                );
            }
        }

        // Detach ourselves; a concurrent `stop` may already have taken the slot.
        drop(self.active.lock().take());
        self.scanning.store(false, Ordering::Release);
    }

    async fn scan(
        &self,
        mut stream: ScanStream,
        mut stop_rx: oneshot::Receiver<ScanStop>,
    ) -> ScanEnd {
        let timeout = self.options.effective_timeout();
        let deadline = tokio::time::sleep_until(Instant::now() + timeout);
        tokio::pin!(deadline);

        let mut seen = HashSet::new();
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                reason = &mut stop_rx => {
                    return ScanEnd::Stopped(reason.unwrap_or(ScanStop::Requested));
                }
                _ = &mut deadline => {
                    info!("Scan timed out after {:?}", timeout);
                    return ScanEnd::TimedOut;
                }
                item = stream.next() => match item {
                    None => return ScanEnd::StreamEnded,
                    Some(Ok(advertisement)) => {
                        consecutive_errors = 0;
                        self.report(advertisement, &mut seen);
                    }
                    Some(Err(failure)) => {
                        if failure.kind.is_fatal() {
                            warn!("Fatal scan error: {}", failure);
                            return ScanEnd::Failed(format!("Scan failed: {}", failure.message));
                        }
                        consecutive_errors += 1;
                        warn!(
                            "Scan error {}/{}: {}",
                            consecutive_errors, self.max_consecutive_errors, failure
                        );
                        if consecutive_errors > self.max_consecutive_errors {
                            return ScanEnd::Failed(format!(
                                "Scan failed after {} consecutive errors: {}",
                                consecutive_errors, failure.message
                            ));
                        }
                    }
                },
            }
        }
    }

    fn report(&self, advertisement: Advertisement, seen: &mut HashSet<String>) {
        let matches = self.options.scan_all_devices
            || advertisement
                .local_name
                .as_deref()
                .map(|name| matches_device_name(name, &self.name_fragment))
                .unwrap_or(false);
        if !matches {
            trace!("Ignoring peripheral {}", advertisement.id);
            return;
        }

        if !self.options.allow_duplicates && !seen.insert(advertisement.id.clone()) {
            return;
        }

        let device = ScaleDevice {
            id: advertisement.id,
            name: advertisement.local_name.unwrap_or_default(),
            rssi: advertisement.rssi,
            connectable: advertisement.connectable,
        };
        debug!("Found scale: {}", device);

        self.discovered
            .write()
            .insert(device.id.clone(), device.clone());
        (self.on_device)(device);
    }
}
