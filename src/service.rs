//! High-level scale service.
//!
//! [`ScaleService`] owns the connection state machine: scanning, a single
//! active session, command exchange and automatic reconnection.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use crate::ble::connection::{
    ConnectionState, ScaleConnectionState, StateCallback, StateTracker,
};
use crate::ble::correlator::exchange;
use crate::ble::platform::BtleplugTransport;
use crate::ble::reconnect::{ReconnectOutcome, ReconnectSupervisor};
use crate::ble::scanner::{ScanOptions, ScanStop, Scanner};
use crate::ble::session::{ActiveSession, SessionLink, WeightCallback, WeightHub};
use crate::ble::subscription::{Subscription, SubscriptionKind};
use crate::ble::transport::{AdapterState, BleTransport};
use crate::ble::uuids::{CONTROL_CHARACTERISTIC_UUID, WEIGHT_CHARACTERISTIC_UUID};
use crate::config::ScaleConfig;
use crate::data::{ScaleDevice, WeightSample, WeightUnit};
use crate::error::{Error, Result};
use crate::permissions::{AlwaysAuthorized, PermissionProvider};
use crate::protocol::{BuzzerMode, CommandOutcome, ScaleCommand};

/// Interval between adapter state polls while waiting for power-on.
const POWER_ON_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Connection to a KGiTON scale.
///
/// # Example
///
/// ```rust,no_run
/// use kgiton_rust_ble::{ScaleConfig, ScaleService, Result};
///
/// # async fn run() -> Result<()> {
/// let service = ScaleService::with_btleplug(ScaleConfig::default()).await?;
/// service.initialize().await?;
/// service.on_weight(|sample| println!("{}", sample));
/// service.connect("scale-id").await?;
/// service.tare().await?;
/// # Ok(())
/// # }
/// ```
pub struct ScaleService {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn BleTransport>,
    permissions: Arc<dyn PermissionProvider>,
    config: ScaleConfig,
    /// Parent span for every task the service spawns.
    span: RwLock<Span>,
    initialized: AtomicBool,
    status: Arc<StateTracker>,
    scanner: Scanner,
    weights: Arc<WeightHub>,
    reconnect: ReconnectSupervisor,
    session: Mutex<Option<ActiveSession>>,
    /// Serialises connect, disconnect and link-loss handling.
    op_lock: tokio::sync::Mutex<()>,
    /// One command in flight at a time.
    command_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl ScaleService {
    /// Create a service on top of a transport and permission provider.
    pub fn new(
        transport: Arc<dyn BleTransport>,
        permissions: Arc<dyn PermissionProvider>,
        config: ScaleConfig,
    ) -> Self {
        let status = Arc::new(StateTracker::new(config.event_capacity));
        let scanner = Scanner::new(
            transport.clone(),
            status.clone(),
            config.device_name_prefix.clone(),
            config.max_consecutive_scan_errors,
        );
        let shared = Shared {
            transport,
            permissions,
            weights: Arc::new(WeightHub::new(config.event_capacity)),
            reconnect: ReconnectSupervisor::new(config.reconnect, config.auto_reconnect),
            config,
            span: RwLock::new(Span::current()),
            initialized: AtomicBool::new(false),
            status,
            scanner,
            session: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
            command_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Create a service using the first system Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_btleplug(config: ScaleConfig) -> Result<Self> {
        let transport = BtleplugTransport::new().await?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(AlwaysAuthorized),
            config,
        ))
    }

    /// Route the service's log output under `span`.
    ///
    /// Background tasks spawned afterwards are instrumented with it.
    pub fn with_span(self, span: Span) -> Self {
        *self.shared.span.write() = span;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &ScaleConfig {
        &self.shared.config
    }

    // === Lifecycle ===

    /// Check the adapter and the host permissions.
    ///
    /// Waits up to [`ScaleConfig::power_on_timeout`] for the adapter to power on.
    /// Calling it again after success is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] or [`Error::PermissionDenied`].
    pub async fn initialize(&self) -> Result<()> {
        if self.shared.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        self.wait_for_power_on().await?;
        self.shared.permissions.ensure_authorized().await?;

        self.shared.initialized.store(true, Ordering::Release);
        info!("Scale service initialized");
        Ok(())
    }

    async fn wait_for_power_on(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.shared.config.power_on_timeout;
        loop {
            match self.shared.transport.adapter_state().await? {
                AdapterState::PoweredOn => return Ok(()),
                AdapterState::Unsupported => {
                    warn!("Bluetooth LE is not supported on this host");
                    return Err(Error::BluetoothUnavailable);
                }
                state => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!("Adapter still {:?} after {:?}", state, self.shared.config.power_on_timeout);
                        return Err(Error::BluetoothUnavailable);
                    }
                    debug!("Adapter state = {:?}, waiting", state);
                }
            }
            tokio::time::sleep(POWER_ON_POLL_INTERVAL).await;
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.shared.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Stop scanning and disconnect.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down scale service");
        self.stop_scan().await;
        self.disconnect().await
    }

    // === Scanning ===

    /// Get scan options built from the configured defaults.
    ///
    /// [`ScanOptions::default`] behaves the same: an unset timeout falls back
    /// to [`ScaleConfig::scan_timeout`].
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::default().with_timeout(self.shared.config.scan_timeout)
    }

    /// Start scanning for scales.
    ///
    /// `on_device` runs for every matching scale. Scan failures are reported
    /// through the connection state, not returned. Starting while already
    /// scanning is a no-op. Without an explicit timeout in `options` the scan
    /// stops after [`ScaleConfig::scan_timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before [`Self::initialize`].
    pub async fn start_scan<F>(&self, on_device: F, options: ScanOptions) -> Result<()>
    where
        F: Fn(ScaleDevice) + Send + Sync + 'static,
    {
        self.ensure_initialized()?;
        let options = options.or_timeout(self.shared.config.scan_timeout);
        self.shared
            .scanner
            .start(options, Arc::new(on_device), self.shared.span())
            .await;
        Ok(())
    }

    /// Stop the running scan.
    pub async fn stop_scan(&self) {
        self.shared.scanner.stop(ScanStop::Requested).await;
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.shared.scanner.is_scanning()
    }

    /// Get every scale reported by scans so far.
    pub fn discovered_devices(&self) -> Vec<ScaleDevice> {
        self.shared.scanner.discovered()
    }

    // === Connection ===

    /// Connect to a scale by id.
    ///
    /// An existing session is torn down first and a running scan is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] after moving to the `Error` state.
    pub async fn connect(&self, device_id: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.shared.reconnect.remember(device_id);
        let _op = self.shared.op_lock.lock().await;
        self.shared.connect_locked(device_id).await
    }

    /// Disconnect from the scale.
    ///
    /// Auto-reconnect is disarmed before the link is touched.
    pub async fn disconnect(&self) -> Result<()> {
        self.shared.reconnect.disarm();
        let _op = self.shared.op_lock.lock().await;

        if self.shared.has_session() {
            self.shared.teardown_locked().await;
        } else if !matches!(
            self.shared.status.state(),
            ConnectionState::Disconnected | ConnectionState::Scanning
        ) {
            self.shared
                .status
                .set(ScaleConnectionState::new(ConnectionState::Disconnected));
        }
        Ok(())
    }

    /// Connect and authorize the session with a license key.
    pub async fn connect_with_license(
        &self,
        device_id: &str,
        license_key: &str,
    ) -> Result<CommandOutcome> {
        self.connect(device_id).await?;
        self.authorize_license(license_key).await
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.status.state()
    }

    /// Get the last emitted state snapshot.
    pub fn state_snapshot(&self) -> ScaleConnectionState {
        self.shared.status.snapshot()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected() && self.shared.has_session()
    }

    /// Get the connected scale.
    pub fn connected_device(&self) -> Option<ScaleDevice> {
        self.shared
            .session
            .lock()
            .as_ref()
            .map(|session| session.device().clone())
    }

    /// Enable or disable automatic reconnects after unexpected link loss.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.shared.reconnect.set_enabled(enabled);
    }

    /// Check if automatic reconnects are enabled.
    pub fn is_auto_reconnect_enabled(&self) -> bool {
        self.shared.reconnect.is_enabled()
    }

    // === Commands ===

    /// Send a command and wait for its response.
    ///
    /// A silent scale counts as success after [`ScaleConfig::command_timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a session.
    pub async fn send_command(&self, command: ScaleCommand) -> Result<CommandOutcome> {
        let _serial = self.shared.command_lock.lock().await;
        let session = self.shared.session_link()?;
        let outcome = exchange(session, &command, self.shared.config.command_timeout).await?;
        debug!(
            "{} -> success={} {}",
            command.label(),
            outcome.success,
            outcome.message_or_default()
        );
        Ok(outcome)
    }

    /// Zero the scale.
    pub async fn tare(&self) -> Result<CommandOutcome> {
        self.send_command(ScaleCommand::Tare).await
    }

    /// Drive the buzzer.
    pub async fn set_buzzer(&self, mode: BuzzerMode) -> Result<CommandOutcome> {
        self.send_command(ScaleCommand::Buzzer(mode)).await
    }

    /// Switch the display unit between kg and lb.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for grams, which the firmware cannot display.
    pub async fn set_unit(&self, unit: WeightUnit) -> Result<CommandOutcome> {
        if unit == WeightUnit::Gram {
            return Err(Error::invalid_parameter("unit", unit));
        }
        self.send_command(ScaleCommand::SetUnit(unit)).await
    }

    /// Enter calibration mode.
    pub async fn start_calibration(&self) -> Result<CommandOutcome> {
        self.send_command(ScaleCommand::CalibrationStart).await
    }

    /// Set the reference weight in kg for calibration.
    pub async fn set_calibration_weight(&self, weight_kg: f64) -> Result<CommandOutcome> {
        if !weight_kg.is_finite() || weight_kg <= 0.0 {
            return Err(Error::invalid_parameter("calibration_weight", weight_kg));
        }
        self.send_command(ScaleCommand::CalibrationSet(weight_kg))
            .await
    }

    /// Leave calibration mode.
    pub async fn finish_calibration(&self) -> Result<CommandOutcome> {
        self.send_command(ScaleCommand::CalibrationEnd).await
    }

    /// Authorize the session with a license key.
    ///
    /// # Errors
    ///
    /// On rejection the scale is disconnected and [`Error::LicenseRejected`] is returned.
    pub async fn authorize_license(&self, license_key: &str) -> Result<CommandOutcome> {
        let command = ScaleCommand::connect(license_key)?;
        let outcome = self.send_command(command).await?;
        if outcome.success {
            info!("License authorized: {}", outcome.message_or_default());
            return Ok(outcome);
        }

        let message = outcome.message_or_default().to_string();
        warn!("License rejected: {}", message);
        if let Err(e) = self.disconnect().await {
            warn!("Failed to disconnect after license rejection: {}", e);
        }
        Err(Error::LicenseRejected { message })
    }

    /// Release the license authorization of the session.
    pub async fn deauthorize_license(&self, license_key: &str) -> Result<CommandOutcome> {
        let command = ScaleCommand::disconnect(license_key)?;
        self.send_command(command).await
    }

    // === Events ===

    /// Register the weight callback, replacing any previous one.
    pub fn on_weight<F>(&self, callback: F)
    where
        F: Fn(&WeightSample) + Send + Sync + 'static,
    {
        let callback: WeightCallback = Arc::new(callback);
        self.shared.weights.set_callback(Some(callback));
    }

    /// Remove the weight callback.
    pub fn clear_weight_callback(&self) {
        self.shared.weights.set_callback(None);
    }

    /// Subscribe to decoded weight samples.
    pub fn subscribe_weight(&self) -> broadcast::Receiver<WeightSample> {
        self.shared.weights.subscribe()
    }

    /// Register the state callback, replacing any previous one.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(&ScaleConnectionState) + Send + Sync + 'static,
    {
        let callback: StateCallback = Arc::new(callback);
        self.shared.status.set_callback(Some(callback));
    }

    /// Remove the state callback.
    pub fn clear_state_callback(&self) {
        self.shared.status.set_callback(None);
    }

    /// Subscribe to state snapshots.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ScaleConnectionState> {
        self.shared.status.subscribe()
    }
}

impl Drop for ScaleService {
    fn drop(&mut self) {
        self.shared.reconnect.disarm();
        let session = self.shared.session.lock().take();
        if let Some(session) = session {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(session.close());
            }
        }
    }
}

impl Shared {
    fn span(&self) -> Span {
        self.span.read().clone()
    }

    fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    fn session_link(&self) -> Result<SessionLink> {
        if !self.status.state().is_connected() {
            return Err(Error::NotConnected);
        }
        self.session
            .lock()
            .as_ref()
            .map(ActiveSession::handle)
            .ok_or(Error::NotConnected)
    }

    /// Connect sequence. Caller holds `op_lock`.
    async fn connect_locked(self: &Arc<Self>, device_id: &str) -> Result<()> {
        if self.has_session() {
            self.teardown_locked().await;
        }
        self.scanner.stop(ScanStop::Connecting).await;

        let device = self
            .scanner
            .lookup(device_id)
            .unwrap_or_else(|| ScaleDevice::new(device_id, ""));
        info!("Connecting to {}", device.display_name());
        self.status.set(
            ScaleConnectionState::new(ConnectionState::Connecting).with_device(Some(device.clone())),
        );

        match self.establish(device.clone()).await {
            Ok(session) => {
                let device = session.device().clone();
                *self.session.lock() = Some(session);
                self.reconnect.connected();
                info!("Connected to {}", device.display_name());
                self.status.set(
                    ScaleConnectionState::new(ConnectionState::Connected).with_device(Some(device)),
                );
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", device.display_name(), e);
                self.status.set(
                    ScaleConnectionState::new(ConnectionState::Error)
                        .with_device(Some(device))
                        .with_error(e.to_string()),
                );
                Err(match e {
                    Error::ConnectionFailed { .. } => e,
                    other => Error::ConnectionFailed {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    async fn establish(self: &Arc<Self>, mut device: ScaleDevice) -> Result<ActiveSession> {
        let link = match tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&device.id),
        )
        .await
        {
            Ok(link) => link?,
            Err(_) => {
                return Err(Error::ConnectionFailed {
                    reason: format!("timed out after {:?}", self.config.connect_timeout),
                })
            }
        };

        if device.name.is_empty() {
            if let Some(name) = link.name() {
                device.name = name;
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut session = ActiveSession::new(generation, device, link, self.config.event_capacity);
        if let Err(e) = self.prepare(&mut session).await {
            session.abort().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Discovery, MTU, notification plumbing and subscriptions.
    async fn prepare(self: &Arc<Self>, session: &mut ActiveSession) -> Result<()> {
        let link = session.link().clone();
        let span = self.span();
        let validity = session.validity();

        link.discover().await?;

        if let Some(mtu) = self.config.requested_mtu {
            match link.request_mtu(mtu).await {
                Ok(granted) => debug!("MTU negotiated: {}", granted),
                Err(e) => warn!("MTU negotiation failed, continuing: {}", e),
            }
        }

        let stream = link.notifications().await?;
        let forwarder = session.spawn_weight_forwarder(self.weights.clone(), span.clone());
        let pump = session.spawn_pump(stream, span);
        session.add(Subscription::new(
            SubscriptionKind::Notifications,
            None,
            validity.clone(),
            Some(pump),
        ));

        match link.subscribe(CONTROL_CHARACTERISTIC_UUID).await {
            Ok(()) => session.add(Subscription::new(
                SubscriptionKind::Control,
                Some(CONTROL_CHARACTERISTIC_UUID),
                validity.clone(),
                None,
            )),
            Err(e) => warn!("Control notifications unavailable, commands will assume success: {}", e),
        }

        if let Err(e) = link.subscribe(WEIGHT_CHARACTERISTIC_UUID).await {
            forwarder.abort();
            return Err(e);
        }
        session.add(Subscription::new(
            SubscriptionKind::Weight,
            Some(WEIGHT_CHARACTERISTIC_UUID),
            validity.clone(),
            Some(forwarder),
        ));

        let lifecycle = self.spawn_lifecycle(session);
        session.add(Subscription::new(
            SubscriptionKind::Lifecycle,
            None,
            validity,
            Some(lifecycle),
        ));
        Ok(())
    }

    fn spawn_lifecycle(self: &Arc<Self>, session: &ActiveSession) -> JoinHandle<()> {
        let shared: Weak<Self> = Arc::downgrade(self);
        let link = session.link().clone();
        let closing = session.closing_flag();
        let generation = session.generation();

        tokio::spawn(
            async move {
                link.wait_disconnected().await;
                if closing.load(Ordering::Acquire) {
                    debug!("Link closed locally");
                    return;
                }
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                // The handler drops the session that owns this task.
                let span = shared.span();
                tokio::spawn(shared.handle_link_loss(generation).instrument(span));
            }
            .instrument(self.span()),
        )
    }

    /// Explicit teardown of the current session. Caller holds `op_lock`.
    async fn teardown_locked(&self) {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return;
        };
        let device = session.device().clone();
        self.status.set(
            ScaleConnectionState::new(ConnectionState::Disconnecting)
                .with_device(Some(device.clone())),
        );
        session.close().await;
        self.status.set(
            ScaleConnectionState::new(ConnectionState::Disconnected).with_device(Some(device)),
        );
    }

    async fn handle_link_loss(self: Arc<Self>, generation: u64) {
        let plan = {
            let _op = self.op_lock.lock().await;
            let session = {
                let mut slot = self.session.lock();
                match slot.as_ref() {
                    Some(current) if current.generation() == generation => slot.take(),
                    _ => None,
                }
            };
            let Some(session) = session else {
                debug!("Ignoring link loss of a replaced session");
                return;
            };

            let device = session.device().clone();
            warn!("Connection to {} lost", device.display_name());
            session.discard();
            self.status.set(
                ScaleConnectionState::new(ConnectionState::Disconnected)
                    .with_device(Some(device))
                    .with_error("Connection lost"),
            );
            self.reconnect.plan()
        };

        let Some(plan) = plan else {
            return;
        };
        let epoch = plan.epoch;

        let outcome = self
            .reconnect
            .run(epoch, |attempt| {
                let shared = self.clone();
                let device_id = plan.device_id.clone();
                async move {
                    let _op = shared.op_lock.lock().await;
                    if !shared.reconnect.is_current(epoch) {
                        return Err(Error::ConnectionFailed {
                            reason: "reconnect superseded".to_string(),
                        });
                    }
                    debug!("Reconnecting to {} (attempt {})", device_id, attempt);
                    shared.connect_locked(&device_id).await
                }
            })
            .await;

        match outcome {
            ReconnectOutcome::Reconnected { attempts } => {
                info!("Reconnected after {} attempts", attempts);
            }
            ReconnectOutcome::Exhausted { attempts } => {
                let _op = self.op_lock.lock().await;
                if self.reconnect.is_current(epoch) && !self.has_session() {
                    self.status.set(
                        ScaleConnectionState::new(ConnectionState::Disconnected)
                            .with_error(format!("Reconnect failed after {} attempts", attempts)),
                    );
                }
            }
            ReconnectOutcome::Superseded => debug!("Reconnect superseded"),
        }
    }
}
