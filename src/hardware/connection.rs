//! Device connection state machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!                               \--fault--> Error
//! (any) --disconnect--> Disconnected
//! ```
//!
//! The machine exclusively owns its session. Every transition updates the
//! state first and then runs each listener, in registration order, before the
//! call that caused it returns.

use crate::core::errors::{HardwareError, Result};
use crate::hardware::eip712::TypedData;
use crate::hardware::path::DerivationPath;
use crate::hardware::signature::SignatureComponents;
use crate::hardware::transaction::Transaction;
use crate::hardware::{AppConfig, DeviceInfo, DeviceProvider, DeviceSession, Vendor};
use crate::tools::async_support::execute_with_optional_timeout;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

type Listener = Arc<dyn Fn(ConnectionState, Option<&HardwareError>) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

impl ListenerRegistry {
    fn add(&self, listener: Listener) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    // Lock is released before listeners run, so a listener may unsubscribe.
    fn snapshot(&self) -> Vec<Listener> {
        self.inner
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Handle returned by [`ConnectionMachine::on_state_change`].
///
/// Dropping it keeps the listener registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to stop notifications.
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Idempotent. Takes effect from the next transition.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Result of an on-screen address confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAddress {
    pub address: String,
    pub verified: bool,
}

pub struct ConnectionMachine {
    provider: Box<dyn DeviceProvider>,
    session: Option<Box<dyn DeviceSession>>,
    state: ConnectionState,
    last_error: Option<HardwareError>,
    connect_timeout: Option<Duration>,
    listeners: Arc<ListenerRegistry>,
}

impl ConnectionMachine {
    /// Starts disconnected; the first operation (or [`connect`](Self::connect)) opens a session.
    pub fn new(provider: Box<dyn DeviceProvider>) -> Self {
        Self {
            provider,
            session: None,
            state: ConnectionState::Disconnected,
            last_error: None,
            connect_timeout: None,
            listeners: Arc::new(ListenerRegistry::default()),
        }
    }

    /// Starts connected around a session the caller already opened.
    pub fn with_session(provider: Box<dyn DeviceProvider>, session: Box<dyn DeviceSession>) -> Self {
        let mut machine = Self::new(provider);
        machine.session = Some(session);
        machine.state = ConnectionState::Connected;
        machine
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn vendor(&self) -> Vendor {
        self.provider.vendor()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.session.is_some()
    }

    /// Fault from the most recent failed connect, cleared on success or disconnect.
    pub fn last_error(&self) -> Option<&HardwareError> {
        self.last_error.as_ref()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectionState, Option<&HardwareError>) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    fn transition(&mut self, state: ConnectionState, error: Option<&HardwareError>) {
        debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        for listener in self.listeners.snapshot() {
            listener(state, error);
        }
    }

    /// No-op when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let vendor = self.vendor();
        info!("Connecting to {} device", vendor);
        self.transition(ConnectionState::Connecting, None);

        let provider = &self.provider;
        let opened = execute_with_optional_timeout(
            async { provider.open().await.map_err(|fault| vendor.classify(fault)) },
            self.connect_timeout,
            "connect",
        )
        .await;

        match opened {
            Ok(session) => {
                let device = session.device_info();
                info!("Connected to {} {}", vendor, device.model);
                self.session = Some(session);
                self.last_error = None;
                self.transition(ConnectionState::Connected, None);
                Ok(())
            }
            Err(err) => {
                warn!("Connection to {} failed: {}", vendor, err);
                self.last_error = Some(err.clone());
                self.transition(ConnectionState::Error, Some(&err));
                Err(err)
            }
        }
    }

    /// Releases the session (close failures are logged and dropped) and
    /// always ends in `Disconnected`, notifying listeners even if already there.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(fault) = session.close().await {
                let err = self.vendor().classify(fault);
                warn!("Ignoring error while closing device session: {}", err);
            }
            info!("Disconnected from {} device", self.vendor());
        }
        self.last_error = None;
        self.transition(ConnectionState::Disconnected, None);
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        match &self.session {
            Some(session) if self.state == ConnectionState::Connected => Ok(session.device_info()),
            _ => Err(HardwareError::device_not_found("No hardware wallet connected")),
        }
    }

    pub async fn app_config(&mut self) -> Result<AppConfig> {
        let vendor = self.vendor();
        let session = match self.session.as_mut() {
            Some(session) if self.state == ConnectionState::Connected => session,
            _ => {
                return Err(HardwareError::app_not_open(
                    "Not connected: open the Ethereum app on the device",
                ))
            }
        };
        session.app_config().await.map_err(|f| vendor.classify(f))
    }

    async fn session(&mut self) -> Result<&mut Box<dyn DeviceSession>> {
        self.connect().await?;
        self.session
            .as_mut()
            .ok_or_else(|| HardwareError::device_not_found("No hardware wallet connected"))
    }

    /// Shows the address for `path` on the device for the user to confirm.
    pub async fn verify_address(&mut self, path: &DerivationPath) -> Result<VerifiedAddress> {
        let address = self.get_address(path, true).await?;
        Ok(VerifiedAddress {
            address,
            verified: true,
        })
    }

    pub async fn get_address(&mut self, path: &DerivationPath, display: bool) -> Result<String> {
        let vendor = self.vendor();
        let session = self.session().await?;
        session
            .get_address(path, display)
            .await
            .map_err(|f| vendor.classify(f))
    }

    pub async fn sign_personal_message(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
    ) -> Result<SignatureComponents> {
        let vendor = self.vendor();
        let session = self.session().await?;
        session
            .sign_personal_message(path, message)
            .await
            .map_err(|f| vendor.classify(f))
    }

    pub async fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        transaction: &Transaction,
    ) -> Result<SignatureComponents> {
        let vendor = self.vendor();
        let session = self.session().await?;
        session
            .sign_transaction(path, transaction)
            .await
            .map_err(|f| vendor.classify(f))
    }

    pub async fn sign_typed_data(
        &mut self,
        path: &DerivationPath,
        typed_data: &TypedData,
    ) -> Result<SignatureComponents> {
        let vendor = self.vendor();
        let session = self.session().await?;
        session
            .sign_typed_data(path, typed_data)
            .await
            .map_err(|f| vendor.classify(f))
    }
}

impl Drop for ConnectionMachine {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            // Best effort: closing needs a runtime.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = session.close().await;
                });
            }
        }
    }
}

impl fmt::Debug for ConnectionMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMachine")
            .field("vendor", &self.vendor())
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .finish()
    }
}
