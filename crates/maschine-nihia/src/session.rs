//! Agent sessions and connections
//!
//! A [`NihiaSession`] owns the transport factory and the registries shared
//! by its connections. Connections come in two flavors keyed by identity:
//! a global connection per device type (discovery, device-state tracking)
//! and a per-device connection per physical unit (events and control).
//! Opening a per-device connection implicitly opens the global one first,
//! matching the order the agent expects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use maschine_core::{DeviceIdentity, HostScheduler, NiEventHandler};

use crate::codec::{
    decode_handshake_response, encode_handshake, encode_keyzone_config,
    encode_notification_ack, encode_project_name, encode_set_leds, response_was_success,
    HandshakeError, SoftwareId, WHOLE_MSG_ACQUIRE, WHOLE_MSG_GET_DEVICE_STATE,
    WHOLE_MSG_REQUEST_FOCUS,
};
use crate::dispatch::Listener;
use crate::registry::KnownDeviceRegistry;
use crate::transport::{RequestChannel, TransportError, TransportFactory, BOOTSTRAP_PORT};

/// Connection bring-up failures.
#[derive(Debug, thiserror::Error)]
pub enum NihiaError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("agent rejected the notification subscription")]
    SubscriptionRejected,
}

/// Session against the host integration agent.
pub struct NihiaSession {
    factory: Arc<dyn TransportFactory>,
    scheduler: Arc<dyn HostScheduler>,
    registry: KnownDeviceRegistry,
    /// Global connections by device type, created on demand
    globals: Mutex<HashMap<u16, Arc<NihiaConnection>>>,
}

impl NihiaSession {
    pub fn new(factory: Arc<dyn TransportFactory>, scheduler: Arc<dyn HostScheduler>) -> Self {
        Self {
            factory,
            scheduler,
            registry: KnownDeviceRegistry::new(),
            globals: Mutex::new(HashMap::new()),
        }
    }

    /// Session over the operating system's native transport.
    pub fn open(scheduler: Arc<dyn HostScheduler>) -> Result<Self, NihiaError> {
        Ok(Self::new(crate::transport::platform_factory()?, scheduler))
    }

    /// Devices the agent has reported as powered on.
    pub fn registry(&self) -> &KnownDeviceRegistry {
        &self.registry
    }

    /// Open a connection for `identity`.
    ///
    /// For a per-device identity the global connection for its device type
    /// is created first if it does not already exist. Kontrol units are
    /// then claimed; direct-access models are driven over USB and never
    /// claimed through the agent. `handler` receives the connection's
    /// decoded events via the session scheduler; pass `None` for
    /// control-only connections.
    pub fn connect(
        &self,
        identity: &DeviceIdentity,
        handler: Option<Arc<dyn NiEventHandler>>,
    ) -> Result<Arc<NihiaConnection>, NihiaError> {
        if identity.is_global() {
            return self.global(identity.device_type());
        }

        self.global(identity.device_type())?;

        let connection = self.bootstrap(identity, handler)?;
        if identity.is_kontrol() {
            connection.acquire();
        }
        Ok(connection)
    }

    /// Get or create the global connection for a device type.
    fn global(&self, device_type: u16) -> Result<Arc<NihiaConnection>, NihiaError> {
        let mut globals = self.globals.lock().unwrap();
        if let Some(existing) = globals.get(&device_type) {
            return Ok(Arc::clone(existing));
        }

        let connection = self.bootstrap(&DeviceIdentity::global(device_type), None)?;
        // Prime the device-state stream so the registry fills in.
        connection.push_request(&WHOLE_MSG_GET_DEVICE_STATE);
        globals.insert(device_type, Arc::clone(&connection));
        Ok(connection)
    }

    /// Handshake on the bootstrap port, open the assigned channels, confirm
    /// the notification subscription, and start the listener.
    fn bootstrap(
        &self,
        identity: &DeviceIdentity,
        handler: Option<Arc<dyn NiEventHandler>>,
    ) -> Result<Arc<NihiaConnection>, NihiaError> {
        let software = if identity.is_kontrol() {
            SoftwareId::KompleteKontrol
        } else {
            SoftwareId::Maschine2
        };

        let bootstrap = self.factory.open_request(BOOTSTRAP_PORT)?;
        let response = bootstrap.transact(&encode_handshake(identity, software));
        let ports = decode_handshake_response(&response)?;
        log::info!(
            "[NIHIA] Agent assigned ports for {:?}: request '{}', notifications '{}'",
            identity,
            ports.request,
            ports.notification
        );

        let request = self.factory.open_request(&ports.request)?;
        let notifications = self.factory.open_notifications(&ports.notification)?;

        // The subscription ACK must succeed or no notifications will flow.
        let ack = request.transact(&encode_notification_ack(&ports.notification));
        if !response_was_success(&ack) {
            return Err(NihiaError::SubscriptionRejected);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let listener = Listener {
            identity: identity.clone(),
            notifications,
            request: Arc::clone(&request),
            registry: self.registry.clone(),
            scheduler: Arc::clone(&self.scheduler),
            handler,
            shutdown: Arc::clone(&shutdown),
        };
        let listener = std::thread::Builder::new()
            .name(format!("nihia-listen-{:04x}", identity.device_type()))
            .spawn(move || listener.run())
            .map_err(|e| TransportError::CreateFailed {
                port: ports.notification.clone(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(NihiaConnection {
            identity: identity.clone(),
            request,
            shutdown,
            listener: Mutex::new(Some(listener)),
        }))
    }

    /// Shut down the global connections this session created. Per-device
    /// connections are owned by their callers and stop on drop.
    pub fn shutdown(&self) {
        for (_, connection) in self.globals.lock().unwrap().drain() {
            connection.shutdown();
        }
    }
}

/// One open channel pair to the agent.
pub struct NihiaConnection {
    identity: DeviceIdentity,
    request: Arc<dyn RequestChannel>,
    shutdown: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl NihiaConnection {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Fire-and-forget raw request.
    pub fn push_request(&self, message: &[u8]) {
        self.request.push(message);
    }

    /// Synchronous raw request; true iff the agent answered with success.
    pub fn send_request(&self, message: &[u8]) -> bool {
        response_was_success(&self.request.transact(message))
    }

    /// Claim exclusive control of the device.
    pub fn acquire(&self) {
        self.request.push(&WHOLE_MSG_ACQUIRE);
    }

    /// Ask the agent to hand us display focus.
    pub fn request_focus(&self) {
        self.request.push(&WHOLE_MSG_REQUEST_FOCUS);
    }

    /// Set all LED colors, one color byte per element in device order.
    pub fn set_led_colors(&self, colors: &[u8]) {
        self.request.push(&encode_set_leds(colors));
    }

    /// Configure the keybed keyzones with the given illumination color.
    pub fn configure_keyzones(&self, key_color: u8) {
        self.request.push(&encode_keyzone_config(key_color));
    }

    /// Set the project name shown by the device. Returns agent success.
    pub fn set_project_name(&self, name: &str) -> bool {
        response_was_success(&self.request.transact(&encode_project_name(name)))
    }

    /// Stop the listener thread. The poll timeout bounds the join.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.listener.lock().unwrap().take() {
            if handle.join().is_err() {
                log::warn!("[NIHIA] Listener for {:?} panicked", self.identity);
            }
        }
    }
}

impl Drop for NihiaConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
