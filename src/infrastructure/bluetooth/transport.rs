//! Transport seams
//!
//! The session never talks to a BLE stack directly. It goes through a
//! [`DeviceDirectory`] to look devices up by address and a [`Transport`] to
//! connect, write and disconnect. `btleplug_backend` provides the real
//! implementations; tests use an in-memory fake.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Invoked by the transport whenever the link to the peripheral drops,
/// whether or not the session asked for it.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Returns the freshest handle for the device being connected, in case the
/// platform re-created it since the session was built.
pub type DeviceResolver<D> = Arc<dyn Fn() -> Option<D> + Send + Sync>;

/// How the retry policy should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retrying cannot help (device gone)
    Abort,
    /// Retry after the policy's backoff delay
    Backoff,
    /// Retry straight away
    Immediate,
    /// Not a transport condition at all
    Fatal,
}

/// Errors an operation can classify for [`RetryPolicy`](super::retry::RetryPolicy)
pub trait Classify {
    fn retry_class(&self) -> RetryClass;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The host stack is busy or its IPC layer failed; worth a short pause
    #[error("Bluetooth stack busy: {0}")]
    Busy(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transport failure: {0}")]
    Fatal(String),
}

impl Classify for TransportError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::NotFound(_) => RetryClass::Abort,
            Self::Busy(_) => RetryClass::Backoff,
            Self::Link(_) | Self::NotConnected => RetryClass::Immediate,
            Self::Fatal(_) => RetryClass::Fatal,
        }
    }
}

/// Looks devices up by address
pub trait DeviceDirectory<D>: Send + Sync {
    fn resolve(&self, address: &str) -> Option<D>;
    fn name(&self, device: &D) -> Option<String>;
    fn rssi(&self, device: &D) -> Option<i16>;
    fn address(&self, device: &D) -> String;
}

/// GATT-level operations against one peripheral
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Device: Clone + Send + Sync + 'static;
    type Client: Send + Sync + 'static;
    type Services: Clone + Send + Sync + 'static;
    type Characteristic: Clone + Send + Sync + 'static;

    /// Connect, retrying transient failures internally. Fails with
    /// [`TransportError::NotFound`] without retrying when the device is gone.
    async fn connect_with_retry(
        &self,
        device: Self::Device,
        name: &str,
        on_disconnect: DisconnectCallback,
        cached_services: Option<Self::Services>,
        resolver: DeviceResolver<Self::Device>,
    ) -> Result<Arc<Self::Client>, TransportError>;

    async fn write_characteristic(
        &self,
        client: &Self::Client,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn disconnect(&self, client: &Self::Client) -> Result<(), TransportError>;

    fn is_connected(&self, client: &Self::Client) -> bool;

    /// Services discovered (or reused from cache) for this connection
    fn services(&self, client: &Self::Client) -> Self::Services;

    fn resolve_characteristic(
        &self,
        services: &Self::Services,
        uuid: Uuid,
    ) -> Option<Self::Characteristic>;
}
