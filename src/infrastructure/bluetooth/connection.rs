//! BLE Connection Module
//!
//! Owns the single link to one light controller: establishes it on demand,
//! resolves the write characteristic, drops it after an idle period and
//! tells deliberate teardowns apart from surprise link loss.
//!
//! All connection fields live in one [`Link`] behind a single async mutex.
//! The idle timer and the transport's disconnect callback only hold weak
//! references and schedule work as tasks; they never touch the link inline.

use crate::infrastructure::bluetooth::error::DeviceError;
use crate::infrastructure::bluetooth::protocol::WRITE_CHAR_UUID;
use crate::infrastructure::bluetooth::transport::{
    DeviceDirectory, DeviceResolver, DisconnectCallback, Transport, TransportError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state guarded by the connect lock
struct Link<T: Transport> {
    client: Option<Arc<T::Client>>,
    // Some exactly when `client` is
    write_char: Option<T::Characteristic>,
    cached_services: Option<T::Services>,
    idle_timer: Option<JoinHandle<()>>,
}

impl<T: Transport> Link<T> {
    fn new() -> Self {
        Self {
            client: None,
            write_char: None,
            cached_services: None,
            idle_timer: None,
        }
    }

    fn is_live(&self, transport: &T) -> bool {
        self.client
            .as_deref()
            .is_some_and(|client| transport.is_connected(client))
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    fn release(&mut self) -> Option<Arc<T::Client>> {
        self.cancel_idle_timer();
        self.write_char = None;
        self.client.take()
    }
}

pub struct ConnectionManager<T: Transport> {
    name: String,
    address: String,
    device: T::Device,
    directory: Arc<dyn DeviceDirectory<T::Device>>,
    transport: Arc<T>,
    idle_delay: Option<Duration>,
    expected_disconnect: AtomicBool,
    link: Mutex<Link<T>>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        name: String,
        address: String,
        device: T::Device,
        directory: Arc<dyn DeviceDirectory<T::Device>>,
        transport: Arc<T>,
        idle_delay: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            address,
            device,
            directory,
            transport,
            idle_delay: idle_delay.filter(|delay| !delay.is_zero()),
            expected_disconnect: AtomicBool::new(false),
            link: Mutex::new(Link::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make sure a live, writable connection exists, connecting if needed.
    pub async fn ensure_connected(self: &Arc<Self>) -> Result<(), DeviceError> {
        let mut link = match self.link.try_lock() {
            Ok(link) => link,
            Err(_) => {
                debug!(
                    "{}: Connection already in progress, waiting for it to complete",
                    self.name
                );
                self.link.lock().await
            }
        };

        // Someone else may have connected while we waited
        if link.is_live(&self.transport) {
            self.reset_idle_timer(&mut link);
            return Ok(());
        }

        // A dead client left behind by the link dropping under us
        link.release();

        debug!("{}: Connecting", self.name);
        let directory = Arc::clone(&self.directory);
        let address = self.address.clone();
        let resolver: DeviceResolver<T::Device> = Arc::new(move || directory.resolve(&address));

        let client = self
            .transport
            .connect_with_retry(
                self.device.clone(),
                &self.name,
                self.disconnect_callback(),
                link.cached_services.clone(),
                resolver,
            )
            .await?;
        debug!("{}: Connected", self.name);

        let services = self.transport.services(&client);
        let write_char = match self.resolve_write_char(&services) {
            Some(characteristic) => Some(characteristic),
            None => {
                debug!(
                    "{}: Write characteristic missing, checking services again",
                    self.name
                );
                self.resolve_write_char(&services)
            }
        };

        let Some(write_char) = write_char else {
            // Force a fresh discovery next time
            link.cached_services = None;
            self.expected_disconnect.store(true, Ordering::SeqCst);
            if let Err(err) = self.transport.disconnect(&client).await {
                warn!("{}: Failed to drop unusable connection: {}", self.name, err);
            }
            return Err(DeviceError::CharacteristicNotFound {
                name: self.name.clone(),
                uuid: WRITE_CHAR_UUID,
            });
        };

        link.cached_services = Some(services);
        link.client = Some(client);
        link.write_char = Some(write_char);
        self.reset_idle_timer(&mut link);
        Ok(())
    }

    fn resolve_write_char(&self, services: &T::Services) -> Option<T::Characteristic> {
        self.transport
            .resolve_characteristic(services, WRITE_CHAR_UUID)
    }

    /// Write a packet over the current connection without reconnecting.
    pub async fn write(&self, packet: &[u8]) -> Result<(), DeviceError> {
        let (client, write_char) = {
            let link = self.link.lock().await;
            match (&link.client, &link.write_char) {
                (Some(client), Some(write_char)) => (Arc::clone(client), write_char.clone()),
                _ => return Err(TransportError::NotConnected.into()),
            }
        };

        debug!("Writing data to {}: {:02x?}", self.name, packet);
        match self
            .transport
            .write_characteristic(&client, &write_char, packet)
            .await
        {
            Ok(()) => Ok(()),
            Err(TransportError::NotConnected) => {
                // The link went away without a disconnect event
                self.release_stale_client(&client).await;
                Err(TransportError::NotConnected.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drop `client` if it is still the current link, so the next
    /// `ensure_connected` reconnects instead of trusting it.
    async fn release_stale_client(&self, client: &Arc<T::Client>) {
        let mut link = self.link.lock().await;
        let current = link
            .client
            .as_ref()
            .is_some_and(|held| Arc::ptr_eq(held, client));
        if current {
            link.release();
            debug!("{}: Released link that refused a write", self.name);
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_live(&self.transport)
    }

    /// Tear the connection down on purpose.
    ///
    /// Handles are cleared before the transport-level disconnect completes,
    /// so concurrent callers already see the session as disconnected.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        self.expected_disconnect.store(true, Ordering::SeqCst);
        let client = link.release();

        if let Some(client) = client {
            if self.transport.is_connected(&client) {
                self.transport.disconnect(&client).await?;
            }
        }
        debug!("{}: Disconnected", self.name);
        Ok(())
    }

    /// Graceful shutdown; failures are logged, never returned.
    pub async fn stop(&self) {
        debug!("{}: Stop", self.name);
        if let Err(err) = self.disconnect().await {
            error!("{}: Failed to disconnect on stop: {}", self.name, err);
        }
    }

    async fn timed_disconnect(&self) {
        debug!(
            "{}: Disconnecting after timeout of {:?}",
            self.name, self.idle_delay
        );
        if let Err(err) = self.disconnect().await {
            error!(
                "{}: Failed to disconnect after idle timeout: {}",
                self.name, err
            );
        }
    }

    /// Cancel any pending idle timer and arm a fresh one.
    fn reset_idle_timer(self: &Arc<Self>, link: &mut Link<T>) {
        link.cancel_idle_timer();
        self.expected_disconnect.store(false, Ordering::SeqCst);

        let Some(delay) = self.idle_delay else {
            return;
        };
        debug!(
            "{}: Configured disconnect from device in {:?}",
            self.name, delay
        );

        let manager = Arc::downgrade(self);
        link.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Aborting this timer must not abort a disconnect in flight
            if let Some(manager) = manager.upgrade() {
                tokio::spawn(async move { manager.timed_disconnect().await });
            }
        }));
    }

    fn disconnect_callback(self: &Arc<Self>) -> DisconnectCallback {
        let manager = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(manager) = manager.upgrade() {
                manager.on_disconnected();
            }
        })
    }

    fn on_disconnected(self: &Arc<Self>) {
        if self.expected_disconnect.load(Ordering::SeqCst) {
            info!("{}: Disconnected from device", self.name);
            return;
        }
        warn!("{}: Device unexpectedly disconnected", self.name);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let manager = Arc::clone(self);
                runtime.spawn(async move { manager.release_dead_link().await });
            }
            Err(_) => debug!(
                "{}: No runtime to clean up on; next connect replaces the link",
                self.name
            ),
        }
    }

    async fn release_dead_link(&self) {
        let mut link = self.link.lock().await;
        let dead = link
            .client
            .as_deref()
            .is_some_and(|client| !self.transport.is_connected(client));
        if dead {
            link.release();
            debug!("{}: Released lost connection", self.name);
        }
    }

    #[cfg(test)]
    pub(crate) async fn has_write_char(&self) -> bool {
        self.link.lock().await.write_char.is_some()
    }

    #[cfg(test)]
    pub(crate) async fn has_idle_timer(&self) -> bool {
        self.link
            .lock()
            .await
            .idle_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}
