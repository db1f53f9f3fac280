//! btleplug bindings
//!
//! Real [`DeviceDirectory`] and [`Transport`] implementations on top of the
//! platform BLE stack.

use crate::domain::settings::TransportSettings;
use crate::infrastructure::bluetooth::transport::{
    DeviceDirectory, DeviceResolver, DisconnectCallback, Transport, TransportError,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Base pause between connect attempts; grows linearly with the attempt number
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        use btleplug::Error;
        match &err {
            Error::DeviceNotFound => Self::NotFound(err.to_string()),
            Error::NotConnected => Self::NotConnected,
            Error::TimedOut(_) | Error::UnexpectedCallback | Error::UnexpectedCharacteristic => {
                Self::Link(err.to_string())
            }
            // BlueZ D-Bus failures and other stack hiccups surface here
            Error::RuntimeError(_) | Error::Other(_) => Self::Busy(err.to_string()),
            _ => Self::Fatal(err.to_string()),
        }
    }
}

/// Get the first Bluetooth adapter on the system
pub async fn first_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Fatal("No Bluetooth adapter found".to_string()))
}

/// A peripheral seen during the last scan
#[derive(Clone)]
pub struct DiscoveredDevice {
    pub peripheral: Peripheral,
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Address book filled by scanning
pub struct BtleplugDirectory {
    adapter: Adapter,
    devices: RwLock<HashMap<String, DiscoveredDevice>>,
}

impl BtleplugDirectory {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Scan for `duration` and remember everything that was seen
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        info!("Scanning for BLE devices for {:?}", duration);
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;

        let peripherals = self.adapter.peripherals().await?;
        let mut found = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            found.push(DiscoveredDevice {
                address: peripheral.address().to_string(),
                name: props.local_name,
                rssi: props.rssi,
                peripheral,
            });
        }

        if let Err(err) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan cleanly: {}", err);
        }

        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        for device in &found {
            devices.insert(device.address.to_uppercase(), device.clone());
        }
        info!("Found {} BLE devices", found.len());
        Ok(found)
    }
}

impl DeviceDirectory<DiscoveredDevice> for BtleplugDirectory {
    fn resolve(&self, address: &str) -> Option<DiscoveredDevice> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address.to_uppercase())
            .cloned()
    }

    fn name(&self, device: &DiscoveredDevice) -> Option<String> {
        device.name.clone()
    }

    fn rssi(&self, device: &DiscoveredDevice) -> Option<i16> {
        // Prefer the reading from the most recent scan
        self.resolve(&device.address)
            .map_or(device.rssi, |latest| latest.rssi)
    }

    fn address(&self, device: &DiscoveredDevice) -> String {
        device.address.clone()
    }
}

/// An established link to one peripheral
pub struct BtleplugClient {
    peripheral: Peripheral,
    connected: Arc<AtomicBool>,
    characteristics: BTreeSet<Characteristic>,
    watcher: JoinHandle<()>,
}

impl Drop for BtleplugClient {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

pub struct BtleplugTransport {
    adapter: Adapter,
    connect_attempts: u32,
    connect_timeout: Duration,
}

impl BtleplugTransport {
    pub fn new(adapter: Adapter, settings: &TransportSettings) -> Self {
        Self {
            adapter,
            connect_attempts: settings.connect_attempts.max(1),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }

    async fn connect_once(
        &self,
        device: &DiscoveredDevice,
        cached: Option<&BTreeSet<Characteristic>>,
    ) -> Result<BTreeSet<Characteristic>, TransportError> {
        let peripheral = &device.peripheral;
        if !peripheral.is_connected().await? {
            tokio::time::timeout(self.connect_timeout, peripheral.connect())
                .await
                .map_err(|_| {
                    TransportError::Link(format!(
                        "connect timed out after {:?}",
                        self.connect_timeout
                    ))
                })??;
        }

        if let Some(cached) = cached.filter(|cached| !cached.is_empty()) {
            debug!("{}: Reusing cached services", device.address);
            return Ok(cached.clone());
        }
        peripheral.discover_services().await?;
        Ok(peripheral.characteristics())
    }
}

/// Ids of peripherals the adapter reports as disconnected
fn disconnections<S>(events: S) -> impl Stream<Item = PeripheralId>
where
    S: Stream<Item = CentralEvent>,
{
    events.filter_map(|event| async move {
        match event {
            CentralEvent::DeviceDisconnected(id) => Some(id),
            _ => None,
        }
    })
}

/// Flip `connected` and fire the callback once `id` shows up in `lost`.
fn spawn_disconnect_watcher<I, S>(
    lost: S,
    id: I,
    connected: Arc<AtomicBool>,
    on_disconnect: DisconnectCallback,
) -> JoinHandle<()>
where
    I: PartialEq + Send + 'static,
    S: Stream<Item = I> + Send + 'static,
{
    tokio::spawn(async move {
        let mut lost = Box::pin(lost);
        while let Some(gone) = lost.next().await {
            if gone == id {
                connected.store(false, Ordering::SeqCst);
                on_disconnect();
                break;
            }
        }
    })
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Device = DiscoveredDevice;
    type Client = BtleplugClient;
    type Services = BTreeSet<Characteristic>;
    type Characteristic = Characteristic;

    async fn connect_with_retry(
        &self,
        device: DiscoveredDevice,
        name: &str,
        on_disconnect: DisconnectCallback,
        cached_services: Option<BTreeSet<Characteristic>>,
        resolver: DeviceResolver<DiscoveredDevice>,
    ) -> Result<Arc<BtleplugClient>, TransportError> {
        let mut attempt = 1;
        loop {
            let target = resolver().unwrap_or_else(|| device.clone());
            // Subscribe first so a drop right after connecting is not missed
            let events: BoxStream<'static, CentralEvent> = self.adapter.events().await?;
            match self.connect_once(&target, cached_services.as_ref()).await {
                Ok(characteristics) => {
                    let connected = Arc::new(AtomicBool::new(true));
                    let watcher = spawn_disconnect_watcher(
                        disconnections(events),
                        target.peripheral.id(),
                        Arc::clone(&connected),
                        on_disconnect,
                    );
                    return Ok(Arc::new(BtleplugClient {
                        peripheral: target.peripheral,
                        connected,
                        characteristics,
                        watcher,
                    }));
                }
                Err(err @ TransportError::NotFound(_)) => return Err(err),
                Err(err) if attempt >= self.connect_attempts => {
                    warn!(
                        "{}: Failed to connect after {} attempts: {}",
                        name, attempt, err
                    );
                    return Err(err);
                }
                Err(err) => {
                    debug!(
                        "{}: Connection attempt {}/{} failed: {}",
                        name, attempt, self.connect_attempts, err
                    );
                    tokio::time::sleep(CONNECT_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn write_characteristic(
        &self,
        client: &BtleplugClient,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let result = client
            .peripheral
            .write(characteristic, data, WriteType::WithoutResponse)
            .await
            .map_err(TransportError::from);
        if let Err(TransportError::NotConnected) = result {
            client.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn disconnect(&self, client: &BtleplugClient) -> Result<(), TransportError> {
        client.peripheral.disconnect().await?;
        client.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self, client: &BtleplugClient) -> bool {
        client.connected.load(Ordering::SeqCst)
    }

    fn services(&self, client: &BtleplugClient) -> BTreeSet<Characteristic> {
        client.characteristics.clone()
    }

    fn resolve_characteristic(
        &self,
        services: &BTreeSet<Characteristic>,
        uuid: Uuid,
    ) -> Option<Characteristic> {
        services
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .cloned()
    }
}
